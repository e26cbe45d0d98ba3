use alloy_core::primitives::B256;

use crate::{
    chain::ChainClient,
    error::{DeployError, DeployResult},
    plan::{Reapply, WiringAction},
    registry::AddressRegistry,
};

use super::Executor;

impl<C, R> Executor<'_, C, R>
where
    C: ChainClient,
    R: AddressRegistry + ?Sized,
{
    /// Send a wiring call to its target module.
    ///
    /// Only once-actions touch the registry, and only after the call landed.
    pub(super) async fn wire(&mut self, action: &WiringAction) -> DeployResult<B256> {
        let target = self.registered_address(&action.target)?;
        let calldata = self.encode_call(&action.target, &action.call)?;

        tracing::info!(
            network = %self.network,
            module = %action.target,
            call = %action.call,
            "Wiring module"
        );

        let tx_hash = self
            .chain
            .call(target, calldata)
            .await
            .map_err(|e| DeployError::chain_call(&action.target, e))?;

        if action.reapply == Reapply::Once {
            self.registry.mark_wired(self.network, &action.key())?;
        }

        tracing::debug!(module = %action.target, tx_hash = %tx_hash, "Wiring confirmed");

        Ok(tx_hash)
    }
}
