// src/core/rpc/mod.rs

//! The RPC dispatcher: the single entry point for every request.
//!
//! Processing order per request: region forwarding (loop-guarded), leader
//! forwarding for writes, authentication through the ACL resolver, then
//! dispatch to the endpoint. Reads run under the blocking-query framework;
//! writes compose a raft entry and return the applier's result plus the
//! commit index.

pub mod aclrpc;
pub mod agent;
pub mod deployment;
pub mod event;
pub mod filter;
pub mod forward;
pub mod job;
pub mod keyring;
pub mod namespace;
pub mod node;
pub mod paginator;
pub mod service;
pub mod system;
pub mod volume;

use crate::core::FlotillaError;
use crate::core::acl::{Acl, NamespaceCapability};
use crate::core::model::Node;
use crate::core::protocol::{RpcRequest, RpcResponse};
use crate::core::state::ServerState;
use std::sync::Arc;
use tracing::debug;

/// The authenticated identity of a request: the compiled ACL, plus the
/// node when the credential was a node secret.
pub struct AuthContext {
    pub acl: Arc<Acl>,
    pub node: Option<Arc<Node>>,
    /// Set when the credential resolved to a stored token.
    pub token_accessor: Option<String>,
    pub secret: String,
}

impl AuthContext {
    pub fn require_management(&self) -> Result<(), FlotillaError> {
        if self.acl.is_management() {
            Ok(())
        } else {
            Err(FlotillaError::PermissionDenied)
        }
    }

    pub fn require_namespace_cap(
        &self,
        namespace: &str,
        cap: NamespaceCapability,
    ) -> Result<(), FlotillaError> {
        if self.acl.allow_namespace_op(namespace, cap) {
            Ok(())
        } else {
            Err(FlotillaError::PermissionDenied)
        }
    }

    /// Node-originated RPCs accept the node's own secret in place of an
    /// ACL capability.
    pub fn require_node_write(&self) -> Result<(), FlotillaError> {
        if self.node.is_some() || self.acl.allow_node_write() {
            Ok(())
        } else {
            Err(FlotillaError::PermissionDenied)
        }
    }

    pub fn require_node_read(&self) -> Result<(), FlotillaError> {
        if self.node.is_some() || self.acl.allow_node_read() {
            Ok(())
        } else {
            Err(FlotillaError::PermissionDenied)
        }
    }
}

pub struct Dispatcher {
    state: Arc<ServerState>,
}

impl Dispatcher {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Long-lived streaming methods, handled by the connection loop rather
    /// than the unary path.
    pub fn is_streaming(method: &str) -> bool {
        matches!(method, "Agent.Monitor" | "Event.Stream")
    }

    /// State-changing methods forward to the leader.
    fn is_write(method: &str) -> bool {
        matches!(
            method,
            "Client.Register"
                | "Client.Deregister"
                | "Client.UpdateStatus"
                | "Job.Register"
                | "Job.Deregister"
                | "Deployment.Fail"
                | "Deployment.Pause"
                | "Deployment.Promote"
                | "Deployment.SetAllocHealth"
                | "Deployment.Reap"
                | "Keyring.Rotate"
                | "Namespace.Upsert"
                | "Namespace.Delete"
                | "ServiceRegistration.Upsert"
                | "ServiceRegistration.DeleteByID"
                | "System.GarbageCollect"
                | "System.ReconcileJobSummaries"
                | "ACL.UpsertPolicies"
                | "ACL.DeletePolicies"
                | "ACL.UpsertRoles"
                | "ACL.UpsertTokens"
                | "ACL.DeleteTokens"
                | "ACL.Bootstrap"
        )
    }

    /// Handles one unary request end to end, converting failures into the
    /// wire error form.
    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        match self.route(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "rpc failed");
                RpcResponse::from_error(&e)
            }
        }
    }

    async fn route(&self, mut request: RpcRequest) -> Result<RpcResponse, FlotillaError> {
        let local_region = self.state.region();
        if !request.region.is_empty() && request.region != local_region {
            if request.forwarded {
                return Err(FlotillaError::ForwardingError(
                    "cross-region forwarding loop detected".to_string(),
                ));
            }
            request.forwarded = true;
            return self.state.router.forward_region(&request.region.clone(), &request).await;
        }

        if Self::is_write(&request.method) && !self.state.raft.is_leader() {
            if request.forwarded {
                return Err(FlotillaError::NoLeader);
            }
            request.forwarded = true;
            return self.state.router.forward_leader(&request).await;
        }

        self.dispatch(request).await
    }

    /// Resolves the presented credential into an `AuthContext`. With ACLs
    /// disabled every request behaves as if it held a management token,
    /// but node secrets are still recognized for node-originated RPCs.
    pub fn authenticate(&self, request: &RpcRequest) -> Result<AuthContext, FlotillaError> {
        let secret = request.auth_token.clone();
        let node = self.state.store.snapshot().node_by_secret(&secret);

        if !self.state.acl_enabled() {
            return Ok(AuthContext {
                acl: Acl::management(),
                node,
                token_accessor: None,
                secret,
            });
        }

        // Signed workload identities are three dot-separated segments;
        // opaque token secrets never contain dots.
        if secret.matches('.').count() == 2 {
            let acl = self.state.acl.resolve_claims(&secret)?;
            return Ok(AuthContext {
                acl,
                node,
                token_accessor: None,
                secret,
            });
        }

        match self.state.acl.resolve_token(&secret) {
            Ok(acl) => {
                let token_accessor = self
                    .state
                    .store
                    .snapshot()
                    .acl_token_by_secret(&secret)
                    .map(|t| t.accessor_id.clone());
                Ok(AuthContext {
                    acl,
                    node,
                    token_accessor,
                    secret,
                })
            }
            // A node secret is a valid credential even though it is not a
            // token; it grants only what node-originated endpoints accept.
            Err(FlotillaError::TokenNotFound) if node.is_some() => Ok(AuthContext {
                acl: Acl::deny_all(),
                node,
                token_accessor: None,
                secret,
            }),
            Err(e) => Err(e),
        }
    }

    /// As `authenticate`, but an unknown secret degrades to a deny-all
    /// context instead of failing. Used for first-contact RPCs where the
    /// presented secret is a node secret the server has not stored yet;
    /// the endpoint still enforces its own rules.
    fn authenticate_lenient(&self, request: &RpcRequest) -> Result<AuthContext, FlotillaError> {
        match self.authenticate(request) {
            Ok(ctx) => Ok(ctx),
            Err(FlotillaError::TokenNotFound) => Ok(AuthContext {
                acl: Acl::deny_all(),
                node: None,
                token_accessor: None,
                secret: request.auth_token.clone(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn dispatch(&self, request: RpcRequest) -> Result<RpcResponse, FlotillaError> {
        let ctx = if request.method == "Client.Register" {
            self.authenticate_lenient(&request)?
        } else {
            self.authenticate(&request)?
        };
        let state = &self.state;

        match request.method.as_str() {
            "Client.Register" => node::register(state, &ctx, &request).await,
            "Client.Deregister" => node::deregister(state, &ctx, &request).await,
            "Client.UpdateStatus" => node::update_status(state, &ctx, &request).await,
            "Client.GetNode" => node::get_node(state, &ctx, &request).await,

            "Job.Register" => job::register(state, &ctx, &request).await,
            "Job.Deregister" => job::deregister(state, &ctx, &request).await,
            "Job.Get" => job::get_job(state, &ctx, &request).await,
            "Job.List" => job::list(state, &ctx, &request).await,

            "Deployment.GetDeployment" => deployment::get_deployment(state, &ctx, &request).await,
            "Deployment.List" => deployment::list(state, &ctx, &request).await,
            "Deployment.Fail" => deployment::fail(state, &ctx, &request).await,
            "Deployment.Pause" => deployment::pause(state, &ctx, &request).await,
            "Deployment.Promote" => deployment::promote(state, &ctx, &request).await,
            "Deployment.SetAllocHealth" => {
                deployment::set_alloc_health(state, &ctx, &request).await
            }
            "Deployment.Allocations" => deployment::allocations(state, &ctx, &request).await,
            "Deployment.Reap" => deployment::reap(state, &ctx, &request).await,

            "Agent.Profile" => agent::profile(state, &ctx, &request).await,

            "Keyring.Rotate" => keyring::rotate(state, &ctx, &request).await,
            "Keyring.List" => keyring::list(state, &ctx, &request).await,
            "Keyring.Fetch" => keyring::fetch(state, &ctx, &request).await,

            "Namespace.Upsert" => namespace::upsert(state, &ctx, &request).await,
            "Namespace.Delete" => namespace::delete(state, &ctx, &request).await,
            "Namespace.List" => namespace::list(state, &ctx, &request).await,
            "Namespace.Get" => namespace::get_namespace(state, &ctx, &request).await,

            "ServiceRegistration.Upsert" => service::upsert(state, &ctx, &request).await,
            "ServiceRegistration.DeleteByID" => service::delete_by_id(state, &ctx, &request).await,
            "ServiceRegistration.List" => service::list(state, &ctx, &request).await,
            "ServiceRegistration.GetService" => service::get_service(state, &ctx, &request).await,

            "System.GarbageCollect" => system::garbage_collect(state, &ctx, &request).await,
            "System.ReconcileJobSummaries" => {
                system::reconcile_job_summaries(state, &ctx, &request).await
            }

            "TaskGroupHostVolumeClaim.List" => volume::list_claims(state, &ctx, &request).await,

            "ACL.UpsertPolicies" => aclrpc::upsert_policies(state, &ctx, &request).await,
            "ACL.DeletePolicies" => aclrpc::delete_policies(state, &ctx, &request).await,
            "ACL.UpsertRoles" => aclrpc::upsert_roles(state, &ctx, &request).await,
            "ACL.UpsertTokens" => aclrpc::upsert_tokens(state, &ctx, &request).await,
            "ACL.DeleteTokens" => aclrpc::delete_tokens(state, &ctx, &request).await,
            "ACL.ListPolicies" => aclrpc::list_policies(state, &ctx, &request).await,
            "ACL.ListRoles" => aclrpc::list_roles(state, &ctx, &request).await,
            "ACL.ListTokens" => aclrpc::list_tokens(state, &ctx, &request).await,
            "ACL.Bootstrap" => aclrpc::bootstrap(state, &ctx, &request).await,
            "ACL.ResolveToken" => aclrpc::resolve_token(state, &ctx, &request).await,

            method => Err(FlotillaError::UnknownMethod(method.to_string())),
        }
    }
}

/// The namespace a request targets, defaulting to `default`.
pub(crate) fn request_namespace(request: &RpcRequest) -> &str {
    if request.namespace.is_empty() {
        crate::core::model::namespace::DEFAULT_NAMESPACE
    } else {
        &request.namespace
    }
}

/// Deserializes the method-specific payload.
pub(crate) fn parse_payload<T: serde::de::DeserializeOwned>(
    request: &RpcRequest,
) -> Result<T, FlotillaError> {
    serde_json::from_value(request.payload.clone())
        .map_err(|e| FlotillaError::InvalidRequest(format!("malformed payload: {e}")))
}

/// Like `parse_payload`, for methods whose payload may be omitted.
pub(crate) fn parse_payload_or_default<T: serde::de::DeserializeOwned + Default>(
    request: &RpcRequest,
) -> Result<T, FlotillaError> {
    if request.payload.is_null() {
        Ok(T::default())
    } else {
        parse_payload(request)
    }
}
