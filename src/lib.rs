#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod consts;
pub mod error;
pub mod hal;
pub mod interrupts;
pub mod pic;
pub mod port;
pub mod sim;
pub mod spinlock;
pub mod timers;
pub mod vectors;

pub use config::PspConfig;
pub use error::{ErrorCode, ErrorHook, ErrorReport, set_error_hook};
pub use hal::{Csr, HartId, Mmio, Platform};
pub use interrupts::{CriticalNesting, LocalInterruptGuard};
pub use pic::{ExternalInterruptController, PicState, Polarity, PriorityOrder, TriggerType};
pub use port::{NestedCriticalHooks, OverlayHooks, PortLocks};
pub use spinlock::{CriticalSection, SpinLock, SpinLockGuard};
pub use timers::{CascadedTimer, InternalTimers, MachineTimer, TimerChannel, TimerControl, TimerId, TimerSelect};
pub use vectors::{InterruptHandler, VectorTable};
