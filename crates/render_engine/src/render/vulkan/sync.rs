//! Synchronization primitives and frame-slot bookkeeping
//!
//! RAII wrappers for semaphores and fences, the per-slot `FrameSync`
//! bundle, and the `FrameSchedule` that tracks which slot's fence guards
//! which swapchain image. The schedule is plain data so the slot/image
//! discipline can be tested without a device.

use ash::{vk, Device};

use crate::render::vulkan::{VulkanError, VulkanResult};

/// GPU-GPU synchronization primitive with automatic resource management
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Host-waitable fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence, optionally already signaled
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Wait for the fence to signal
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout)
                .map_err(VulkanError::Api)
        }
    }

    /// Reset the fence to unsignaled
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization objects for one frame slot
pub struct FrameSync {
    /// Signaled when the acquired swapchain image is ready to render into
    pub image_available: Semaphore,
    /// Signaled when rendering has finished and the image may be presented
    pub render_finished: Semaphore,
    /// Signaled when the slot's submitted work has completed on the GPU
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create frame synchronization objects. The fence starts signaled so
    /// the first wait on a fresh slot returns immediately.
    pub fn new(device: Device) -> VulkanResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, true)?;

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }
}

/// Result of a swapchain image acquisition, as the frame loop sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready to be rendered into
    Acquired(u32),
    /// The surface is out of date; nothing was acquired
    Stale,
}

/// What one frame tick should do after acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Tear down and rebuild the swapchain resource set, drawing nothing
    RebuildSwapchain,
    /// Record and submit a frame targeting `image`
    Draw {
        /// Acquired swapchain image index
        image: u32,
        /// Frame slot whose fence last targeted this image and must be
        /// waited on before reuse, if any
        prior_slot: Option<usize>,
    },
}

/// Slot/image bookkeeping for the frame loop.
///
/// Tracks the current frame slot and, per swapchain image, the slot whose
/// submission last targeted it. An image may be handed out again while
/// that earlier submission is still in flight whenever the swapchain holds
/// more images than there are frame slots; the schedule reports the slot
/// to wait on.
pub struct FrameSchedule {
    slot_count: usize,
    current: usize,
    image_slots: Vec<Option<usize>>,
}

impl FrameSchedule {
    /// Create a schedule for `slot_count` frame slots over `image_count`
    /// swapchain images
    pub fn new(slot_count: usize, image_count: usize) -> Self {
        Self {
            slot_count,
            current: 0,
            image_slots: vec![None; image_count],
        }
    }

    /// The frame slot this tick runs in
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Decide what to do with an acquisition result
    pub fn plan(&self, outcome: AcquireOutcome) -> TickAction {
        match outcome {
            AcquireOutcome::Stale => TickAction::RebuildSwapchain,
            AcquireOutcome::Acquired(image) => TickAction::Draw {
                image,
                prior_slot: self.image_slots[image as usize],
            },
        }
    }

    /// Record that the current slot submitted work targeting `image`
    pub fn mark_submitted(&mut self, image: u32) {
        self.image_slots[image as usize] = Some(self.current);
    }

    /// Advance to the next frame slot, modulo the slot count
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slot_count;
    }

    /// Forget all image associations after a swapchain rebuild
    pub fn reset_images(&mut self, image_count: usize) {
        self.image_slots.clear();
        self.image_slots.resize(image_count, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal driver mimicking one frame tick against scripted
    /// acquisition outcomes, counting what the schedule decides.
    struct LoopDriver {
        schedule: FrameSchedule,
        rebuilds: usize,
        submissions: usize,
        presents: usize,
    }

    impl LoopDriver {
        fn new(slots: usize, images: usize) -> Self {
            Self {
                schedule: FrameSchedule::new(slots, images),
                rebuilds: 0,
                submissions: 0,
                presents: 0,
            }
        }

        fn tick(&mut self, outcome: AcquireOutcome) -> TickAction {
            let action = self.schedule.plan(outcome);
            match action {
                TickAction::RebuildSwapchain => {
                    self.rebuilds += 1;
                    self.schedule.reset_images(self.schedule.image_slots.len());
                    // No draw, no present, no slot advance: next tick retries
                }
                TickAction::Draw { image, .. } => {
                    self.schedule.mark_submitted(image);
                    self.submissions += 1;
                    self.presents += 1;
                    self.schedule.advance();
                }
            }
            action
        }
    }

    #[test]
    fn test_stale_acquisitions_rebuild_without_submitting() {
        let mut driver = LoopDriver::new(2, 3);

        driver.tick(AcquireOutcome::Stale);
        driver.tick(AcquireOutcome::Stale);

        assert_eq!(driver.rebuilds, 2);
        assert_eq!(driver.submissions, 0);
        assert_eq!(driver.presents, 0);

        // A successful acquisition then submits and presents exactly once
        driver.tick(AcquireOutcome::Acquired(0));
        assert_eq!(driver.rebuilds, 2);
        assert_eq!(driver.submissions, 1);
        assert_eq!(driver.presents, 1);
    }

    #[test]
    fn test_stale_tick_does_not_advance_slot() {
        let mut driver = LoopDriver::new(2, 3);

        assert_eq!(driver.schedule.current_slot(), 0);
        driver.tick(AcquireOutcome::Stale);
        assert_eq!(driver.schedule.current_slot(), 0);

        driver.tick(AcquireOutcome::Acquired(1));
        assert_eq!(driver.schedule.current_slot(), 1);
    }

    #[test]
    fn test_image_reuse_reports_prior_slot() {
        // 2 slots over 3 images: when image 0 comes around again while the
        // slot-0 submission may still be in flight, the new slot must wait
        // on slot 0's fence first.
        let mut driver = LoopDriver::new(2, 3);

        let first = driver.tick(AcquireOutcome::Acquired(0));
        assert_eq!(
            first,
            TickAction::Draw {
                image: 0,
                prior_slot: None
            }
        );

        let second = driver.tick(AcquireOutcome::Acquired(0));
        assert_eq!(
            second,
            TickAction::Draw {
                image: 0,
                prior_slot: Some(0)
            }
        );
    }

    #[test]
    fn test_rebuild_clears_image_associations() {
        let mut driver = LoopDriver::new(2, 3);

        driver.tick(AcquireOutcome::Acquired(2));
        driver.tick(AcquireOutcome::Stale);

        let action = driver.tick(AcquireOutcome::Acquired(2));
        assert_eq!(
            action,
            TickAction::Draw {
                image: 2,
                prior_slot: None
            }
        );
    }

    #[test]
    fn test_slots_cycle_modulo_count() {
        let mut driver = LoopDriver::new(2, 3);

        for i in 0..5 {
            driver.tick(AcquireOutcome::Acquired(i % 3));
        }
        // 5 draws over 2 slots lands on slot 1
        assert_eq!(driver.schedule.current_slot(), 1);
    }
}
