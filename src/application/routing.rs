use crate::domain::actor::{Actor, RiskLevel};
use crate::domain::payment::{Amount, ApprovalState};
use rust_decimal::Decimal;
use serde::Serialize;

/// Amount-driven routing decisions. Every answer is a pure function of the
/// amount, the configured thresholds and the actor's risk level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingPolicy {
    pub four_stage: bool,
    pub authorization_threshold: Decimal,
    pub auto_approve_limit: Option<Decimal>,
    pub auto_post_threshold: Option<Decimal>,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            four_stage: false,
            authorization_threshold: Decimal::new(10_000, 0),
            auto_approve_limit: None,
            auto_post_threshold: None,
        }
    }
}

impl RoutingPolicy {
    pub fn requires_authorization(&self, amount: Amount) -> bool {
        self.four_stage && amount.value() > self.authorization_threshold
    }

    /// Whether submission may jump straight to `approved`.
    pub fn auto_approves(&self, amount: Amount, actor: &Actor) -> bool {
        actor.risk_level == RiskLevel::Normal
            && self
                .auto_approve_limit
                .is_some_and(|limit| amount.value() <= limit)
    }

    pub fn auto_posts(&self, amount: Amount) -> bool {
        self.auto_post_threshold
            .is_some_and(|threshold| amount.value() <= threshold)
    }

    /// The states a payment passes through from draft to posted.
    pub fn route(&self, amount: Amount, submitter: &Actor) -> Vec<ApprovalState> {
        use ApprovalState::*;
        if self.auto_approves(amount, submitter) {
            return vec![Draft, Approved, Posted];
        }
        let mut route = vec![Draft, UnderReview, ForApproval];
        if self.requires_authorization(amount) {
            route.push(ForAuthorization);
        }
        route.extend([Approved, Posted]);
        route
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    #[test]
    fn test_authorization_only_with_four_stage_flag() {
        let mut policy = RoutingPolicy {
            authorization_threshold: dec!(5000),
            ..RoutingPolicy::default()
        };
        assert!(!policy.requires_authorization(amount(dec!(6000))));
        policy.four_stage = true;
        assert!(policy.requires_authorization(amount(dec!(6000))));
        assert!(!policy.requires_authorization(amount(dec!(5000))));
    }

    #[test]
    fn test_auto_approve_respects_restriction() {
        let policy = RoutingPolicy {
            auto_approve_limit: Some(dec!(100)),
            ..RoutingPolicy::default()
        };
        let normal = Actor::new("n");
        let restricted = Actor::new("r").with_risk_level(RiskLevel::Restricted);
        assert!(policy.auto_approves(amount(dec!(100)), &normal));
        assert!(!policy.auto_approves(amount(dec!(100.01)), &normal));
        assert!(!policy.auto_approves(amount(dec!(50)), &restricted));
    }

    #[test]
    fn test_route_shapes() {
        use ApprovalState::*;
        let policy = RoutingPolicy {
            four_stage: true,
            authorization_threshold: dec!(1000),
            auto_approve_limit: Some(dec!(10)),
            auto_post_threshold: None,
        };
        let actor = Actor::new("a");
        assert_eq!(policy.route(amount(dec!(5)), &actor), vec![Draft, Approved, Posted]);
        assert_eq!(
            policy.route(amount(dec!(500)), &actor),
            vec![Draft, UnderReview, ForApproval, Approved, Posted]
        );
        assert_eq!(
            policy.route(amount(dec!(5000)), &actor),
            vec![Draft, UnderReview, ForApproval, ForAuthorization, Approved, Posted]
        );
    }
}
