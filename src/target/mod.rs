/*!
 * Execution targets
 *
 * Implementations of `ExecutionTarget` for this machine and for a remote host
 * reached through a `SessionConnector`.
 */

mod local;
mod remote;

pub use local::LocalTarget;
pub use remote::RemoteTarget;
