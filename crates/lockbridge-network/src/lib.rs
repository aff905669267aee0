//! Cloud client for the lock bridge.
//!
//! # Components
//!
//! - [`transport`]: the [`CloudTransport`] seam with HTTP and mock transports
//! - [`session`]: [`SessionClient`], the shared access/refresh token pair
//! - [`queue`]: [`RequestQueue`] and [`RetryExecutor`], one call in flight at a time
//! - [`gateway`]: [`LockCloudGateway`], typed lock, passcode and card operations
//! - [`mock`]: scripted transport used by tests
//!
//! # Example
//!
//! ```no_run
//! use lockbridge_network::{HttpTransport, LockCloudGateway, RequestQueue, RetryExecutor, SessionClient};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> lockbridge_core::Result<()> {
//! let transport = HttpTransport::new("https://euapi.ttlock.com", Duration::from_secs(30))?;
//! let session = Arc::new(SessionClient::new(transport.clone(), "client-id", "client-secret"));
//! session.authenticate("user@example.com", "password").await?;
//!
//! let queue = RequestQueue::start(RetryExecutor::new(Arc::clone(&session), transport));
//! let gateway = LockCloudGateway::new(queue);
//! for lock in gateway.get_locks().await? {
//!     println!("{} {}", lock.id, lock.name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod gateway;
pub mod mock;
pub mod queue;
pub mod session;
pub mod transport;

pub use gateway::{LockCloudGateway, LockDetails, assemble_lock};
pub use queue::{RequestQueue, RetryExecutor};
pub use session::{SessionClient, SessionState};
pub use transport::{AnyTransport, CloudRequest, CloudResponse, CloudTransport, HttpMethod, HttpTransport};
