//! Buffering of remote ICE candidates received too early.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
};

use async_trait::async_trait;
use huddle_client_api_proto::IceCandidate;
use tracerr::Traced;

use super::MediaSessionError;

/// Receiver of remote [`IceCandidate`]s.
#[cfg_attr(any(test, feature = "mockable"), mockall::automock)]
#[async_trait(?Send)]
pub trait CandidateSink {
    /// Applies the given remote [`IceCandidate`].
    ///
    /// # Errors
    ///
    /// If the candidate cannot be applied.
    async fn apply_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<(), Traced<MediaSessionError>>;
}

/// FIFO of remote [`IceCandidate`]s waiting for a [`CandidateSink`] able to
/// accept them.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    /// Pending candidates in arrival order.
    queue: RefCell<VecDeque<IceCandidate>>,

    /// Indicator whether [`CandidateBuffer::drain_into`] is in progress.
    draining: Cell<bool>,
}

impl CandidateBuffer {
    /// Creates a new empty [`CandidateBuffer`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the given `candidate` to the end of this [`CandidateBuffer`].
    #[inline]
    pub fn enqueue(&self, candidate: IceCandidate) {
        self.queue.borrow_mut().push_back(candidate);
    }

    /// Indicates whether this [`CandidateBuffer`] holds no candidates.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Returns count of the pending candidates.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Indicates whether this [`CandidateBuffer`] is being drained right now.
    #[inline]
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.get()
    }

    /// Drops all the pending candidates.
    #[inline]
    pub fn clear(&self) {
        self.queue.borrow_mut().clear();
    }

    /// Removes all the pending candidates in their arrival order and applies
    /// each of them to the given `sink`.
    ///
    /// Candidates enqueued while draining are drained too. A failed apply
    /// doesn't stop draining: its error is logged and returned along with all
    /// the other ones.
    pub async fn drain_into<S>(
        &self,
        sink: &S,
    ) -> Vec<Traced<MediaSessionError>>
    where
        S: CandidateSink + ?Sized,
    {
        let mut errors = Vec::new();
        self.draining.set(true);
        loop {
            // The borrow must end before awaiting.
            let next = self.queue.borrow_mut().pop_front();
            let candidate = match next {
                Some(c) => c,
                None => break,
            };
            if let Err(e) = sink.apply_candidate(candidate).await {
                log::error!("Failed to apply buffered ICE candidate: {}", e);
                errors.push(e);
            }
        }
        self.draining.set(false);
        errors
    }
}

#[cfg(test)]
mod candidate_buffer_spec {
    use std::{cell::RefCell, rc::Rc};

    use futures::FutureExt as _;
    use mockall::Sequence;

    use super::*;

    fn candidate(n: u16) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{}", n),
            sdp_m_line_index: Some(0),
            sdp_mid: Some("0".to_owned()),
            username_fragment: None,
        }
    }

    #[test]
    fn drains_in_enqueue_order() {
        let buffer = CandidateBuffer::new();
        for n in 1..=3 {
            buffer.enqueue(candidate(n));
        }
        assert_eq!(buffer.len(), 3);

        let mut sink = MockCandidateSink::new();
        let mut seq = Sequence::new();
        for n in 1..=3 {
            sink.expect_apply_candidate()
                .withf(move |c| *c == candidate(n))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }

        let errors = buffer.drain_into(&sink).now_or_never().unwrap();

        assert!(errors.is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn second_drain_applies_nothing() {
        let buffer = CandidateBuffer::new();
        buffer.enqueue(candidate(1));
        buffer.enqueue(candidate(2));

        let mut sink = MockCandidateSink::new();
        sink.expect_apply_candidate().times(2).returning(|_| Ok(()));

        buffer.drain_into(&sink).now_or_never().unwrap();
        buffer.drain_into(&sink).now_or_never().unwrap();

        assert!(buffer.is_empty());
    }

    #[test]
    fn failed_apply_does_not_stop_draining() {
        let buffer = CandidateBuffer::new();
        for n in 1..=3 {
            buffer.enqueue(candidate(n));
        }

        let applied = Rc::new(RefCell::new(Vec::new()));
        let mut sink = MockCandidateSink::new();
        let applied_clone = Rc::clone(&applied);
        sink.expect_apply_candidate().times(3).returning_st(move |c| {
            if c == candidate(2) {
                return Err(tracerr::new!(MediaSessionError::NotReady));
            }
            applied_clone.borrow_mut().push(c);
            Ok(())
        });

        let errors = buffer.drain_into(&sink).now_or_never().unwrap();

        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0].as_ref(), MediaSessionError::NotReady));
        assert_eq!(*applied.borrow(), vec![candidate(1), candidate(3)]);
        assert!(!buffer.is_draining());
    }

    #[test]
    fn clear_drops_pending() {
        let buffer = CandidateBuffer::new();
        buffer.enqueue(candidate(1));

        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);
    }
}
