// Frame protocol bookkeeping
//
// Owns the order of the single in-flight frame. The swapchain hands the GPU
// work for each step in as closures, so out-of-order calls are refused before
// anything is recorded and a fence nobody will signal is never waited on.

use anyhow::Result;
use ash::vk;

use super::RenderError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePhase {
    /// Resources exist, no frame begun yet
    Constructed,
    /// Command buffer is open inside the render pass
    Recording,
    /// Command buffer submitted and image presented
    Submitted,
}

impl FramePhase {
    fn name(self) -> &'static str {
        match self {
            FramePhase::Constructed => "constructed",
            FramePhase::Recording => "recording",
            FramePhase::Submitted => "submitted",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceState {
    Signaled,
    /// Reset on the CPU, nothing submitted that would signal it
    Unsignaled,
    /// Submitted work will signal it
    Pending,
}

#[derive(Debug)]
pub struct FrameCycle {
    phase: FramePhase,
    fence: FenceState,
    pre_signals: u32,
    frames_submitted: u64,
}

impl FrameCycle {
    /// `fence_flags` are the flags the in-flight fence was created with; a
    /// fence created signaled lets the very first begin through.
    pub fn new(fence_flags: vk::FenceCreateFlags) -> Self {
        let pre_signaled = fence_flags.contains(vk::FenceCreateFlags::SIGNALED);
        Self {
            phase: FramePhase::Constructed,
            fence: if pre_signaled {
                FenceState::Signaled
            } else {
                FenceState::Unsignaled
            },
            pre_signals: u32::from(pre_signaled),
            frames_submitted: 0,
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn fence(&self) -> FenceState {
        self.fence
    }

    /// How many times the fence was signaled without any submission
    pub fn pre_signals(&self) -> u32 {
        self.pre_signals
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Begin a frame.
    ///
    /// `wait_and_reset` blocks on the in-flight fence and resets it; `open`
    /// acquires an image and opens the render pass, returning whatever the
    /// caller needs from that (the image index).
    pub fn begin_frame<T>(
        &mut self,
        wait_and_reset: impl FnOnce() -> Result<()>,
        open: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        self.check_begin()?;
        wait_and_reset()?;
        self.fence = FenceState::Unsignaled;

        let opened = open()?;
        self.phase = FramePhase::Recording;
        Ok(opened)
    }

    /// Record draw commands into the open frame
    pub fn apply_frame(&self, record: impl FnOnce() -> Result<()>) -> Result<()> {
        self.check_recording("apply")?;
        record()
    }

    /// End the frame: `submit` closes and submits the command buffer with the
    /// fence, `present` queues the image, `wait_idle` blocks until the device
    /// has drained.
    pub fn end_frame<T>(
        &mut self,
        submit: impl FnOnce() -> Result<()>,
        present: impl FnOnce() -> Result<T>,
        wait_idle: impl FnOnce() -> Result<()>,
    ) -> Result<T> {
        self.check_recording("end")?;
        submit()?;
        self.fence = FenceState::Pending;
        self.phase = FramePhase::Submitted;
        self.frames_submitted += 1;

        let presented = present()?;
        wait_idle()?;
        // Everything submitted has finished, so the fence fired
        self.fence = FenceState::Signaled;
        Ok(presented)
    }

    fn check_begin(&self) -> Result<(), RenderError> {
        match self.phase {
            FramePhase::Constructed | FramePhase::Submitted => {}
            FramePhase::Recording => return Err(self.out_of_order("begin")),
        }
        match self.fence {
            FenceState::Signaled | FenceState::Pending => Ok(()),
            FenceState::Unsignaled => Err(RenderError::FenceDeadlock),
        }
    }

    fn check_recording(&self, operation: &'static str) -> Result<(), RenderError> {
        match self.phase {
            FramePhase::Recording => Ok(()),
            _ => Err(self.out_of_order(operation)),
        }
    }

    fn out_of_order(&self, operation: &'static str) -> RenderError {
        RenderError::FrameOrder {
            operation,
            phase: self.phase.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FrameSync;
    use std::cell::RefCell;

    type Calls = RefCell<Vec<&'static str>>;

    fn step<'a>(calls: &'a Calls, name: &'static str) -> impl FnOnce() -> Result<()> + 'a {
        move || {
            calls.borrow_mut().push(name);
            Ok(())
        }
    }

    /// One Begin -> Apply -> End with every GPU step stubbed out
    fn run_frame(cycle: &mut FrameCycle, calls: &Calls) -> Result<()> {
        cycle.begin_frame(step(calls, "wait+reset"), step(calls, "acquire+open"))?;
        cycle.apply_frame(step(calls, "draw"))?;
        cycle.end_frame(step(calls, "submit"), step(calls, "present"), step(calls, "wait idle"))
    }

    fn error_kind(err: &anyhow::Error) -> Option<&RenderError> {
        err.downcast_ref::<RenderError>()
    }

    #[test]
    fn fence_created_by_frame_sync_is_pre_signaled_once() {
        let cycle = FrameCycle::new(FrameSync::FENCE_FLAGS);
        assert_eq!(cycle.phase(), FramePhase::Constructed);
        assert_eq!(cycle.fence(), FenceState::Signaled);
        assert_eq!(cycle.pre_signals(), 1);
    }

    #[test]
    fn unsignaled_fence_would_block_the_first_begin() {
        let calls = Calls::default();
        let mut cycle = FrameCycle::new(vk::FenceCreateFlags::empty());
        assert_eq!(cycle.pre_signals(), 0);

        let err = run_frame(&mut cycle, &calls).unwrap_err();
        assert!(matches!(error_kind(&err), Some(RenderError::FenceDeadlock)));
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn many_frames_never_deadlock() {
        let calls = Calls::default();
        let mut cycle = FrameCycle::new(FrameSync::FENCE_FLAGS);
        for _ in 0..1000 {
            run_frame(&mut cycle, &calls).unwrap();
            assert_eq!(cycle.fence(), FenceState::Signaled);
        }
        assert_eq!(cycle.frames_submitted(), 1000);
        assert_eq!(cycle.pre_signals(), 1);
        assert_eq!(calls.borrow().len(), 6 * 1000);
    }

    #[test]
    fn steps_run_in_protocol_order() {
        let calls = Calls::default();
        let mut cycle = FrameCycle::new(FrameSync::FENCE_FLAGS);
        run_frame(&mut cycle, &calls).unwrap();
        assert_eq!(
            *calls.borrow(),
            vec!["wait+reset", "acquire+open", "draw", "submit", "present", "wait idle"]
        );
        assert_eq!(cycle.phase(), FramePhase::Submitted);
    }

    #[test]
    fn fence_stays_pending_until_the_device_is_idle() {
        let mut cycle = FrameCycle::new(FrameSync::FENCE_FLAGS);
        cycle.begin_frame(|| Ok(()), || Ok(())).unwrap();
        let result = cycle.end_frame(
            || Ok(()),
            || Ok(()),
            || anyhow::bail!("device lost"),
        );
        assert!(result.is_err());
        assert_eq!(cycle.fence(), FenceState::Pending);
        assert_eq!(cycle.frames_submitted(), 1);

        // Pending work will still signal the fence, so begin may wait on it
        let calls = Calls::default();
        run_frame(&mut cycle, &calls).unwrap();
        assert_eq!(cycle.fence(), FenceState::Signaled);
    }

    #[test]
    fn abandoned_begin_would_deadlock() {
        let mut cycle = FrameCycle::new(FrameSync::FENCE_FLAGS);
        let acquire: Result<u32> = cycle.begin_frame(|| Ok(()), || anyhow::bail!("acquire failed"));
        assert!(acquire.is_err());
        assert_eq!(cycle.fence(), FenceState::Unsignaled);

        // Nothing was submitted, so the fence can never fire
        let calls = Calls::default();
        let err = cycle
            .begin_frame(step(&calls, "wait+reset"), || Ok(()))
            .unwrap_err();
        assert!(matches!(error_kind(&err), Some(RenderError::FenceDeadlock)));
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn apply_and_end_need_an_open_frame() {
        let calls = Calls::default();
        let mut cycle = FrameCycle::new(FrameSync::FENCE_FLAGS);
        let err = cycle.apply_frame(step(&calls, "draw")).unwrap_err();
        assert!(matches!(
            error_kind(&err),
            Some(RenderError::FrameOrder { operation: "apply", phase: "constructed" })
        ));

        run_frame(&mut cycle, &calls).unwrap();
        calls.borrow_mut().clear();
        let err = cycle
            .end_frame(step(&calls, "submit"), || Ok(()), || Ok(()))
            .unwrap_err();
        assert!(matches!(
            error_kind(&err),
            Some(RenderError::FrameOrder { operation: "end", phase: "submitted" })
        ));
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn begin_twice_is_rejected() {
        let mut cycle = FrameCycle::new(FrameSync::FENCE_FLAGS);
        cycle.begin_frame(|| Ok(()), || Ok(())).unwrap();
        let err = cycle.begin_frame(|| Ok(()), || Ok(())).unwrap_err();
        assert!(matches!(
            error_kind(&err),
            Some(RenderError::FrameOrder { operation: "begin", phase: "recording" })
        ));
    }
}
