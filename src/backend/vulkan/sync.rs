// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync. One `FrameSync` per frame slot
// bounds how far the CPU can run ahead of the GPU.

use super::driver::VulkanDriver;
use crate::error::{device_fatal, Result};
use ash::vk;
use parking_lot::Mutex;
use std::sync::Arc;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    driver: Arc<dyn VulkanDriver>,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(driver: Arc<dyn VulkanDriver>) -> Result<Self> {
        let image_available = driver
            .create_semaphore()
            .map_err(device_fatal("create semaphore"))?;
        let render_finished = driver
            .create_semaphore()
            .map_err(device_fatal("create semaphore"))?;
        // Start signaled so the first wait returns immediately
        let in_flight_fence = driver
            .create_fence(true)
            .map_err(device_fatal("create fence"))?;

        Ok(Self {
            driver,
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    pub fn wait(&self) -> Result<()> {
        self.driver
            .wait_for_fence(self.in_flight_fence)
            .map_err(device_fatal("wait for fence"))
    }

    pub fn reset(&self) -> Result<()> {
        self.driver
            .reset_fence(self.in_flight_fence)
            .map_err(device_fatal("reset fence"))
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        self.driver.destroy_semaphore(self.image_available);
        self.driver.destroy_semaphore(self.render_finished);
        self.driver.destroy_fence(self.in_flight_fence);
    }
}

/// A single signaled-on-creation fence for compute submissions
pub struct Fence {
    driver: Arc<dyn VulkanDriver>,
    handle: vk::Fence,
}

impl Fence {
    pub fn signaled(driver: Arc<dyn VulkanDriver>) -> Result<Self> {
        let handle = driver
            .create_fence(true)
            .map_err(device_fatal("create fence"))?;
        Ok(Self { driver, handle })
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    pub fn wait_and_reset(&self) -> Result<()> {
        self.driver
            .wait_for_fence(self.handle)
            .map_err(device_fatal("wait for fence"))?;
        self.driver
            .reset_fence(self.handle)
            .map_err(device_fatal("reset fence"))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.driver.destroy_fence(self.handle);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalState {
    Idle,
    /// A consumer is registered; the next compute submission signals
    Requested,
    /// The signaling submission is being handed to the queue
    Submitting,
    /// Signal submitted, not yet waited on
    Signaled,
}

/// Binary semaphore linking one compute submission to one later graphics submission.
///
/// Binary semaphores pair every signal with exactly one wait. A submission only
/// signals after a consumer asked for it; the consumer only waits once that
/// signal is on the queue.
pub struct ComputeSignal {
    driver: Arc<dyn VulkanDriver>,
    semaphore: vk::Semaphore,
    state: Mutex<SignalState>,
}

impl ComputeSignal {
    pub fn new(driver: Arc<dyn VulkanDriver>) -> Result<Arc<Self>> {
        let semaphore = driver
            .create_semaphore()
            .map_err(device_fatal("create semaphore"))?;
        Ok(Arc::new(Self {
            driver,
            semaphore,
            state: Mutex::new(SignalState::Idle),
        }))
    }

    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Register a consumer. No-op while a signal is already requested or pending.
    pub fn request(&self) {
        let mut state = self.state.lock();
        if *state == SignalState::Idle {
            *state = SignalState::Requested;
        }
    }

    /// Called by the producing submission: whether it must signal the semaphore.
    /// An armed signal is settled with [`submitted`](Self::submitted).
    pub fn arm(&self) -> bool {
        let mut state = self.state.lock();
        let armed = *state == SignalState::Requested;
        if armed {
            *state = SignalState::Submitting;
        }
        armed
    }

    /// A failed submit signals nothing; the request stays open for the next one
    pub fn submitted(&self, ok: bool) {
        let mut state = self.state.lock();
        if *state == SignalState::Submitting {
            *state = if ok {
                SignalState::Signaled
            } else {
                SignalState::Requested
            };
        }
    }

    /// Called by the consuming submission: whether it must wait on the semaphore
    pub fn consume(&self) -> bool {
        let mut state = self.state.lock();
        let pending = *state == SignalState::Signaled;
        if pending {
            *state = SignalState::Idle;
        }
        pending
    }

    /// Drop a request nothing will ever signal
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if *state == SignalState::Requested {
            *state = SignalState::Idle;
        }
    }

    /// Neither requested nor pending; consumers can forget it
    pub fn is_idle(&self) -> bool {
        *self.state.lock() == SignalState::Idle
    }
}

impl Drop for ComputeSignal {
    fn drop(&mut self) {
        self.driver.destroy_semaphore(self.semaphore);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::vulkan::fake::FakeDriver;

    #[test]
    fn signal_is_waited_on_once_per_request() {
        let signal = ComputeSignal::new(FakeDriver::new()).unwrap();

        // nothing asked for it yet
        assert!(!signal.arm());
        assert!(!signal.consume());

        signal.request();
        signal.request();
        assert!(!signal.consume());
        assert!(signal.arm());
        assert!(!signal.arm());
        // still on its way to the queue
        assert!(!signal.consume());
        signal.submitted(true);

        signal.request();
        assert!(signal.consume());
        assert!(!signal.consume());
        assert!(signal.is_idle());
    }

    #[test]
    fn failed_submits_keep_the_request_open() {
        let signal = ComputeSignal::new(FakeDriver::new()).unwrap();
        signal.request();
        assert!(signal.arm());
        signal.submitted(false);
        assert!(!signal.consume());
        assert!(signal.arm());
    }

    #[test]
    fn cancelled_requests_go_idle() {
        let signal = ComputeSignal::new(FakeDriver::new()).unwrap();
        signal.request();
        assert!(!signal.is_idle());
        signal.cancel();
        assert!(signal.is_idle());
        assert!(!signal.arm());
    }
}
