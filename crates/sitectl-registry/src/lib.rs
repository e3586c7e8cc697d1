mod catalog;
mod ledger;
mod site_tree;

pub use catalog::{parse_catalog_response, FilesystemCatalog, HttpCatalog};
pub use ledger::{parse_ledger, HelperLedger};
pub use site_tree::SiteTree;

#[cfg(test)]
mod tests;
