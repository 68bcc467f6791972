//! OAuth 2.0 / OpenID Connect authorization-code client.
//!
//! - [`authorize`] - Authorization requests and pending state
//! - [`response`] - Callback classification and error codes
//! - [`token_endpoint`] - Code and refresh token exchange at the provider
//! - [`flow`] - The flow tying them to local token issuance
//! - [`pkce`] - S256 verifier/challenge
//! - [`pending`] - Pending authorization storage
//!
//! # Example
//!
//! ```ignore
//! use tokenward_auth::oauth::{AuthorizationCodeFlow, CallbackParameters};
//!
//! let (redirect, _pending) = flow.begin();
//! // ... user agent returns to the redirect URI ...
//! let params = CallbackParameters::parse(callback_query);
//! let tokens = flow.handle_callback(&params).await?;
//! ```

pub mod authorize;
pub mod flow;
pub mod pending;
pub mod pkce;
pub mod response;
pub mod token_endpoint;

pub use authorize::{AuthorizationRequestBuilder, PendingAuthorization, generate_state};
pub use flow::{
    AuthenticationMapper, AuthorizationCodeFlow, FlowError, IdTokenAuthenticationMapper,
    MappingError, ReceivedCallback,
};
pub use pending::{InMemoryPendingAuthorizationStore, PendingAuthorizationStore};
pub use pkce::{PkceChallenge, PkceError, PkceVerifier};
pub use response::{
    AuthorizationErrorCode, AuthorizationErrorResponse, CallbackParameters, FlowState,
};
pub use token_endpoint::{
    ClientCredentials, TokenEndpointAuthMethod, TokenEndpointClient, TokenEndpointError,
    TokenEndpointResponse, TokenErrorResponse, TokenRequestContentType,
};
