pub mod adapter;
pub mod dummy;
pub mod registry;
pub mod unifi;

pub use adapter::{DiscoveredCamera, IntegrationAdapter};
pub use registry::CameraRegistry;
pub use unifi::UnifiProtectAdapter;
