//! A direct, userspace Bluetooth Low Energy host stack: HCI, L2CAP, ATT/GATT and SMP over raw
//! controller sockets, with no daemon in the loop.
//!
//! Every blocking layer (`l2cap::Channel`, `att::client::Client`, `gatt::GattClient`) is driven by
//! the calling thread; the only background threads this crate spawns are the one HCI reader per
//! adapter (`hci::Hci::new`) and whatever notification dispatcher or GATT server loop a caller
//! explicitly asks for.

pub mod adapter;
pub mod addr;
pub mod att;
pub mod error;
pub mod gap;
pub mod gatt;
pub mod hci;
pub mod keystore;
pub mod l2cap;
pub mod manager;
pub mod sm;
pub mod uuid;

pub use adapter::{Adapter, AdapterConfig};
pub use addr::{Address, AddressType};
pub use error::{Error, ErrorKind, Result};
pub use manager::Manager;
pub use uuid::Uuid;
