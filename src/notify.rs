//! Inter-core notifications ("kicks").
//!
//! A kick carries no payload, it only says "check the ring".  Each side has
//! one interrupt line per vring.  The interrupt handlers do nothing but bump
//! a [`KickCounter`]; all real work happens later in
//! [`crate::channel::Transport::poll()`].
//!
//! ```rust,ignore
//! static KICKS: Kicks = Kicks::new();
//!
//! fn tx_vring_irq() {
//!     KICKS.on_tx_kick();
//! }
//!
//! fn rx_vring_irq() {
//!     KICKS.on_rx_kick();
//! }
//! ```
//!
//! The counters are the only state shared between interrupt and poll
//! context.  They are read-modify-written inside a [`critical_section`], so
//! the platform must provide a `critical-section` implementation (usually
//! by disabling IRQs).

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::cell::Cell;

use critical_section::Mutex;

/// Raise a notification on the peer core.
pub trait Notify {
    /// Kick the peer, typically by triggering a software-generated interrupt.
    fn notify(&self);
}

impl<T: Notify + ?Sized> Notify for &T {
    fn notify(&self) {
        (**self).notify()
    }
}

/// Counter of kicks received but not yet processed.
pub struct KickCounter {
    count: Mutex<Cell<u32>>,
}

impl KickCounter {
    // Must be const so it can live in a static.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            count: Mutex::new(Cell::new(0)),
        }
    }

    /// Record one kick.  Called from the interrupt handler.
    pub fn signal(&self) {
        critical_section::with(|cs| {
            let count = self.count.borrow(cs);
            count.set(count.get().saturating_add(1));
        });
    }

    /// Consume one kick, if any.  Called from the poll loop.
    pub fn take(&self) -> bool {
        critical_section::with(|cs| {
            let count = self.count.borrow(cs);
            match count.get() {
                0 => false,
                n => {
                    count.set(n - 1);
                    true
                }
            }
        })
    }

    /// Number of outstanding kicks
    pub fn pending(&self) -> u32 {
        critical_section::with(|cs| self.count.borrow(cs).get())
    }
}

/// Kick counters for both vrings.
pub struct Kicks {
    /// Kicks for the firmware-to-OS vring: the OS has returned buffers
    pub tx: KickCounter,

    /// Kicks for the OS-to-firmware vring: the OS has sent messages
    pub rx: KickCounter,
}

impl Kicks {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            tx: KickCounter::new(),
            rx: KickCounter::new(),
        }
    }

    /// Interrupt handler body for the tx vring interrupt
    pub fn on_tx_kick(&self) {
        self.tx.signal();
    }

    /// Interrupt handler body for the rx vring interrupt
    pub fn on_rx_kick(&self) {
        self.rx.signal();
    }
}

/// Idle until something may have changed.
///
/// Used by blocking sends while they wait for the OS side to return a
/// buffer.  This keeps the crate free of any specific CPU or runtime.
pub trait WaitForEvent {
    fn wait_for_event(&mut self);
}

/// Busy-wait with a spin-loop hint.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinWait;

impl WaitForEvent for SpinWait {
    fn wait_for_event(&mut self) {
        core::hint::spin_loop();
    }
}

/// Sleep on the ARM `wfe` instruction.  Any interrupt, including a kick,
/// wakes the core.
#[cfg(target_arch = "arm")]
#[derive(Debug, Default, Clone, Copy)]
pub struct Wfe;

#[cfg(target_arch = "arm")]
impl WaitForEvent for Wfe {
    fn wait_for_event(&mut self) {
        unsafe { core::arch::asm!("wfe", options(nostack, preserves_flags)) };
    }
}
