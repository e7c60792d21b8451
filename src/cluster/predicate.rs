use std::fmt;
use std::sync::Arc;

use crate::core::node::Node;
use crate::core::version::ApiVersion;
use crate::utils::platform::{Os, Platform};

/// A pure test over a node, used to pick dispatch candidates.
///
/// Implementations must not have side effects: the dispatcher and
/// [`Cluster::find_nodes`](super::Cluster::find_nodes) evaluate them freely
/// and from many tasks at once.
pub trait NodePredicate: Send + Sync {
    fn matches(&self, node: &Node) -> bool;
}

impl<F> NodePredicate for F
where
    F: Fn(&Node) -> bool + Send + Sync,
{
    fn matches(&self, node: &Node) -> bool {
        self(node)
    }
}

/// Composable node predicate.
#[derive(Clone)]
pub enum Predicate {
    /// Matches every node
    Any,
    /// Host platform or any additional platform runs this OS (any arch)
    SupportsOs(Os),
    /// Host platform or any additional platform is exactly this OS/arch
    SupportsPlatform(Platform),
    /// Host platform runs this OS
    IsOs(Os),
    /// Host platform is exactly this OS/arch
    IsPlatform(Platform),
    Manager,
    LegacyController,
    Experimental,
    /// Version lies within the node's `[min, max]` API range
    SupportsApiVersion(ApiVersion),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Custom(Arc<dyn NodePredicate>),
}

impl Predicate {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Node) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(Arc::new(f))
    }

    /// `self && other`, flattening nested conjunctions.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut all) => {
                all.push(other);
                Predicate::And(all)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    /// `self || other`, flattening nested disjunctions.
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut any) => {
                any.push(other);
                Predicate::Or(any)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::And(predicates.into_iter().collect())
    }

    pub fn any_of(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::Or(predicates.into_iter().collect())
    }
}

impl NodePredicate for Predicate {
    fn matches(&self, node: &Node) -> bool {
        match self {
            Predicate::Any => true,
            Predicate::SupportsOs(os) => node.supports_os(os),
            Predicate::SupportsPlatform(platform) => node.supports_platform(platform),
            Predicate::IsOs(os) => &node.host_platform.os == os,
            Predicate::IsPlatform(platform) => &node.host_platform == platform,
            Predicate::Manager => node.is_manager,
            Predicate::LegacyController => node.is_legacy_controller,
            Predicate::Experimental => node.experimental,
            Predicate::SupportsApiVersion(version) => node.supports_api_version(*version),
            // `all`/`any` stop at the first deciding operand
            Predicate::And(all) => all.iter().all(|p| p.matches(node)),
            Predicate::Or(any) => any.iter().any(|p| p.matches(node)),
            Predicate::Not(inner) => !inner.matches(node),
            Predicate::Custom(f) => f.matches(node),
        }
    }
}

impl std::ops::Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Self::Output {
        match self {
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Any => write!(f, "any"),
            Predicate::SupportsOs(os) => write!(f, "supports-os({os})"),
            Predicate::SupportsPlatform(p) => write!(f, "supports-platform({p})"),
            Predicate::IsOs(os) => write!(f, "is-os({os})"),
            Predicate::IsPlatform(p) => write!(f, "is-platform({p})"),
            Predicate::Manager => write!(f, "manager"),
            Predicate::LegacyController => write!(f, "legacy-controller"),
            Predicate::Experimental => write!(f, "experimental"),
            Predicate::SupportsApiVersion(v) => write!(f, "api({v})"),
            Predicate::And(all) => f.debug_tuple("and").field(all).finish(),
            Predicate::Or(any) => f.debug_tuple("or").field(any).finish(),
            Predicate::Not(inner) => write!(f, "not({inner:?})"),
            Predicate::Custom(_) => write!(f, "custom"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(result: bool, calls: &Arc<AtomicUsize>) -> Predicate {
        let calls = calls.clone();
        Predicate::custom(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            result
        })
    }

    #[test]
    fn and_short_circuits_on_first_false() {
        let calls = Arc::new(AtomicUsize::new(0));
        let p = Predicate::all([counting(false, &calls), counting(true, &calls)]);
        assert!(!p.matches(&Node::new("n")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn or_short_circuits_on_first_true() {
        let calls = Arc::new(AtomicUsize::new(0));
        let p = Predicate::any_of([counting(true, &calls), counting(false, &calls)]);
        assert!(p.matches(&Node::new("n")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_combinators() {
        let node = Node::new("n");
        assert!(Predicate::And(vec![]).matches(&node));
        assert!(!Predicate::Or(vec![]).matches(&node));
    }

    #[test]
    fn negation_round_trips() {
        let node = Node::new("n").with_experimental(true);
        let p = !Predicate::Experimental;
        assert!(!p.matches(&node));
        assert!((!p).matches(&node));
    }

    #[test]
    fn builders_flatten() {
        let p = Predicate::Manager
            .and(Predicate::Experimental)
            .and(Predicate::LegacyController);
        match p {
            Predicate::And(all) => assert_eq!(all.len(), 3),
            other => panic!("expected a flat conjunction, got {other:?}"),
        }
    }

    #[test]
    fn host_only_versus_supported() {
        let node = Node::new("w")
            .with_platform(Platform::new(Os::WINDOWS, "amd64"))
            .with_supported_platform(Platform::new(Os::LCOW, "amd64"));

        assert!(Predicate::SupportsOs(Os::LCOW).matches(&node));
        assert!(!Predicate::IsOs(Os::LCOW).matches(&node));
        assert!(Predicate::IsPlatform(Platform::new("windows", "x86_64")).matches(&node));
        assert!(!Predicate::IsPlatform(Platform::new("lcow", "amd64")).matches(&node));
        assert!(Predicate::SupportsPlatform(Platform::new("lcow", "amd64")).matches(&node));
    }

    #[test]
    fn closures_are_predicates() {
        let named_n1 = |n: &Node| n.name == "n1";
        assert!(named_n1.matches(&Node::new("n1")));
        assert!(!named_n1.matches(&Node::new("n2")));
    }
}
