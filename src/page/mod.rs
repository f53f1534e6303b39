//! Host page abstraction.
//!
//! The controller never talks to a concrete UI framework. A host hands it a
//! [`Page`]: an element tree it can query and mutate under one exclusive
//! borrow, plus a [`MutationFeed`] announcing elements added to the body.
//! [`HtmlPage`] is the bundled implementation backed by parsed HTML.

mod html;

pub use html::{ElementSnapshot, HtmlPage, PageError};

use std::sync::Arc;

/// Attribute opting an element into a service.
pub const SERVICE_ATTR: &str = "data-red-service";
/// Prefix of the `id` and class conventions (`red-<service>`).
pub const TARGET_PREFIX: &str = "red-";
/// Marker class of elements whose service is enabled.
pub const ACTIVE_CLASS: &str = "red-active";
/// Marker class of elements whose service is disabled.
pub const INACTIVE_CLASS: &str = "red-inactive";

/// Handle of an element inside a page tree.
pub type NodeId = usize;

/// `red-<service>`, the id and class name targeting `service`.
pub fn target_name(service: &str) -> String {
    format!("{TARGET_PREFIX}{service}")
}

/// Queries and mutations the visibility applier needs.
pub trait ElementTree {
    /// Every element whose `data-red-service` equals `service`.
    fn elements_with_service(&self, service: &str) -> Vec<NodeId>;

    /// First element in document order carrying `id`.
    fn element_by_id(&self, id: &str) -> Option<NodeId>;

    /// Every element whose class list contains `class`.
    fn elements_with_class(&self, class: &str) -> Vec<NodeId>;

    /// Hide (`display: none`) or restore the default display.
    fn set_hidden(&mut self, node: NodeId, hidden: bool);

    fn add_class(&mut self, node: NodeId, class: &str);

    fn remove_class(&mut self, node: NodeId, class: &str);
}

/// Summary of an element inserted into the observed subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddedElement {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub service: Option<String>,
}

impl AddedElement {
    /// Whether the element follows one of the three targeting conventions.
    pub fn is_flag_target(&self) -> bool {
        self.service.is_some()
            || self
                .id
                .as_deref()
                .is_some_and(|id| id.starts_with(TARGET_PREFIX))
            || self
                .classes
                .iter()
                .any(|class| class.starts_with(TARGET_PREFIX))
    }
}

/// Callback invoked with each batch of added elements.
pub type MutationCallback = Arc<dyn Fn(&[AddedElement]) + Send + Sync>;

/// Token returned by [`MutationFeed::on_relevant_mutation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Event subscription for elements appearing under the page body.
pub trait MutationFeed: Send + Sync {
    fn on_relevant_mutation(&self, callback: MutationCallback) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// A page the controller can drive.
pub trait Page: MutationFeed {
    /// Run `f` with exclusive access to the element tree. No other reader
    /// or writer observes the tree until `f` returns.
    fn with_tree(&self, f: &mut dyn FnMut(&mut dyn ElementTree));
}
