//! Applying flag sets to a page.
//!
//! Every service in the flag set is looked up through three independent
//! conventions: the `data-red-service` attribute, the `red-<service>` id and
//! the `red-<service>` class. Matched elements are shown or hidden and carry
//! exactly one of the `red-active`/`red-inactive` markers.

mod watcher;

pub use watcher::ChangeWatcher;

use crate::flags::FlagSet;
use crate::page::{ACTIVE_CLASS, ElementTree, INACTIVE_CLASS, NodeId, target_name};

/// What a single application touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Services visited.
    pub services: usize,
    /// Element updates performed; an element matched by several conventions
    /// counts once per match.
    pub elements: usize,
}

/// Apply `flags` to every matching element of `tree`.
///
/// Idempotent. When an element is targeted by two different services the one
/// sorting last wins, since flag sets iterate in name order.
pub fn apply_flags(tree: &mut dyn ElementTree, flags: &FlagSet) -> ApplyReport {
    let mut report = ApplyReport::default();

    for (service, active) in flags.iter() {
        report.services += 1;
        let target = target_name(service);

        let mut nodes = tree.elements_with_service(service);
        nodes.extend(tree.element_by_id(&target));
        nodes.extend(tree.elements_with_class(&target));

        for node in nodes {
            set_state(tree, node, active);
            report.elements += 1;
        }
    }

    report
}

fn set_state(tree: &mut dyn ElementTree, node: NodeId, active: bool) {
    tree.set_hidden(node, !active);
    if active {
        tree.remove_class(node, INACTIVE_CLASS);
        tree.add_class(node, ACTIVE_CLASS);
    } else {
        tree.remove_class(node, ACTIVE_CLASS);
        tree.add_class(node, INACTIVE_CLASS);
    }
}
