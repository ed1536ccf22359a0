//! Gateway application state.

use std::sync::Arc;

use fleetport_auth::JwtValidator;
use fleetport_control::ControlPlane;

use crate::config::GatewayConfig;

/// Shared state handed to every request handler.
pub struct GatewayState<C, V>
where
    C: ControlPlane,
    V: JwtValidator,
{
    /// The control plane.
    pub control: Arc<C>,
    /// Validator for operator JWTs.
    pub jwt_validator: Arc<V>,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl<C, V> GatewayState<C, V>
where
    C: ControlPlane,
    V: JwtValidator,
{
    /// Create a new gateway state.
    #[must_use]
    pub fn new(control: Arc<C>, jwt_validator: Arc<V>, config: GatewayConfig) -> Self {
        Self {
            control,
            jwt_validator,
            config,
        }
    }
}

impl<C, V> Clone for GatewayState<C, V>
where
    C: ControlPlane,
    V: JwtValidator,
{
    fn clone(&self) -> Self {
        Self {
            control: Arc::clone(&self.control),
            jwt_validator: Arc::clone(&self.jwt_validator),
            config: self.config.clone(),
        }
    }
}
