use std::future::Future;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::token::TokenClient;
use crate::types::{Address, TokenAmount};

/// Two-phase authorize-then-act workflow. Fund-moving actions run through
/// [`AllowanceGate::run_gated`], which raises the standing authorization
/// first when it is short.
pub struct AllowanceGate {
    token: TokenClient,
    multiple: u64,
}

impl AllowanceGate {
    pub fn new(token: TokenClient, multiple: u64) -> Self {
        Self { token, multiple }
    }

    /// Makes sure `owner`'s authorization covers `required`. Returns whether
    /// an approval call was performed. Re-invoking after a prior success with
    /// the same or smaller requirement performs zero further approvals.
    pub async fn ensure_authorized(
        &self,
        owner: &Address,
        required: TokenAmount,
    ) -> Result<bool> {
        let current = self.token.allowance(owner).await?;
        if current >= required {
            trace!("authorization {} already covers {}", current, required);
            return Ok(false);
        }
        // Over-authorize to amortize future actions into a single prompt.
        let target = required.saturating_mul(self.multiple);
        debug!(
            "raising spend authorization for {} from {} to {}",
            owner, current, target
        );
        self.token.approve(target).await?;
        // The approval replaced the standing amount, but a spend already in
        // flight elsewhere can still draw it down before the dependent call
        // lands. Re-verify instead of assuming.
        let after = self.token.allowance(owner).await?;
        if after < required {
            return Err(Error::AuthorizationShortfall { required });
        }
        Ok(true)
    }

    /// Runs `action` once the authorization covers `required`. The action is
    /// never attempted when the approval fails.
    pub async fn run_gated<T, F, Fut>(
        &self,
        owner: &Address,
        required: TokenAmount,
        action: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_authorized(owner, required).await?;
        action().await
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::token::TestToken;

    fn gate_with(token: &Arc<TestToken>) -> AllowanceGate {
        let client = TokenClient::new(token.clone(), Address::new("0xbeef"), 100_000_000);
        AllowanceGate::new(client, 10)
    }

    #[tokio::test]
    async fn short_allowance_triggers_one_overapproval() {
        let token = Arc::new(TestToken::default());
        let owner = Address::new("0x01");
        token.impersonate(owner.clone());
        let gate = gate_with(&token);

        let approved = gate.ensure_authorized(&owner, 50_000_000).await.unwrap();
        assert!(approved);
        let approvals = token.approvals();
        assert_eq!(approvals.len(), 1);
        assert!(approvals[0].1 >= 500_000_000);
    }

    #[tokio::test]
    async fn repeated_invocations_are_idempotent() {
        let token = Arc::new(TestToken::default());
        let owner = Address::new("0x01");
        token.impersonate(owner.clone());
        let gate = gate_with(&token);

        assert!(gate.ensure_authorized(&owner, 50_000_000).await.unwrap());
        assert!(!gate.ensure_authorized(&owner, 50_000_000).await.unwrap());
        assert!(!gate.ensure_authorized(&owner, 10_000_000).await.unwrap());
        assert_eq!(token.approvals().len(), 1);
    }

    #[tokio::test]
    async fn failed_approval_never_runs_the_action() {
        let token = Arc::new(TestToken::default());
        let owner = Address::new("0x01");
        token.impersonate(owner.clone());
        token.fail_next_approve();
        let gate = gate_with(&token);

        let mut ran = false;
        let result = gate
            .run_gated(&owner, 50_000_000, || async {
                ran = true;
                Ok("unreachable")
            })
            .await;
        assert!(result.is_err());
        assert!(!ran);
    }

    #[tokio::test]
    async fn racing_drawdown_is_caught_before_the_action() {
        let token = Arc::new(TestToken::default());
        let owner = Address::new("0x01");
        token.impersonate(owner.clone());
        // A racing spend eats almost the whole fresh approval before the
        // re-verification read.
        token.consume_on_next_approve(499_999_999);
        let gate = gate_with(&token);

        let err = gate
            .run_gated(&owner, 50_000_000, || async { Ok("unreachable") })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::AuthorizationShortfall {
                required: 50_000_000
            }
        ));
    }
}
