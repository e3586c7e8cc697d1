use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    Add,
    Remove,
    Update,
}

impl Action {
    /// Order in which queued groups are applied.
    pub const EXECUTION_ORDER: [Action; 3] = [Action::Remove, Action::Add, Action::Update];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub action: Action,
    pub full_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    Queued,
    AlreadyQueued,
    /// The addon already sits in another group; the request was dropped.
    Conflicting(Action),
}

/// Three disjoint, insertion-ordered groups of addon requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionPlan {
    add: Vec<String>,
    remove: Vec<String>,
    update: Vec<String>,
}

impl ActionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, action: Action, full_name: &str) -> QueueOutcome {
        if let Some(existing) = self.group_of(full_name) {
            if existing == action {
                return QueueOutcome::AlreadyQueued;
            }
            return QueueOutcome::Conflicting(existing);
        }
        self.group_mut(action).push(full_name.to_string());
        QueueOutcome::Queued
    }

    pub fn group(&self, action: Action) -> &[String] {
        match action {
            Action::Add => &self.add,
            Action::Remove => &self.remove,
            Action::Update => &self.update,
        }
    }

    fn group_mut(&mut self, action: Action) -> &mut Vec<String> {
        match action {
            Action::Add => &mut self.add,
            Action::Remove => &mut self.remove,
            Action::Update => &mut self.update,
        }
    }

    pub fn group_of(&self, full_name: &str) -> Option<Action> {
        Action::EXECUTION_ORDER
            .into_iter()
            .find(|action| self.group(*action).iter().any(|queued| queued == full_name))
    }

    /// Absorbs `other` group by group; conflicting entries are returned, not merged.
    pub fn merge(&mut self, other: &ActionPlan) -> Vec<(ActionRequest, Action)> {
        let mut conflicts = Vec::new();
        for request in other.ordered() {
            if let QueueOutcome::Conflicting(existing) =
                self.queue(request.action, &request.full_name)
            {
                conflicts.push((request, existing));
            }
        }
        conflicts
    }

    /// Remove, then add, then update; insertion order within a group.
    pub fn ordered(&self) -> Vec<ActionRequest> {
        Action::EXECUTION_ORDER
            .into_iter()
            .flat_map(|action| {
                self.group(action).iter().map(move |full_name| ActionRequest {
                    action,
                    full_name: full_name.clone(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.add.len() + self.remove.len() + self.update.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
