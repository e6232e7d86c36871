//! Image builds: the backend interface and the driver that sequences it

pub mod backend;
pub mod driver;

pub use backend::{BuildBackend, BuildOutput, BuildRequest, DockerCliBackend, LocalCommandBackend};
pub use driver::{BuildDriver, BuildReport, TransientMatcher, DEFAULT_TRANSIENT_PATTERNS};
