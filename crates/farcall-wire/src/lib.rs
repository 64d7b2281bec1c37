//! Farcall Wire Protocol: signed remote method calls over HTTP.
//!
//! Two ends share a secret and a transport credential set:
//! - the [`CallProxy`] builds and signs call envelopes, posts them and
//!   verifies the signed reply
//! - the [`RemoteDispatcher`] authenticates the request, verifies the
//!   envelope, resolves the target through an explicit [`TargetRegistry`]
//!   and answers with a signed response envelope
//!
//! Every envelope is signed with HMAC over its canonical JSON form.

pub mod capture;
pub mod connection;
pub mod dispatcher;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod signing;
pub mod target;
pub mod transport;

pub use capture::CaptureScope;
pub use connection::ConnectionDescriptor;
pub use dispatcher::{RemoteDispatcher, ServerAuth};
pub use proxy::{CallProxy, MemorySink, OutputSink, StdoutSink};
pub use registry::{TargetLoader, TargetRegistry};
pub use server::RpcServer;
pub use signing::EnvelopeSigner;
pub use target::{method_not_found, Args, RemoteTarget};
pub use transport::{HttpTransport, ReqwestTransport};
