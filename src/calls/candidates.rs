use rtccore::media::IceCandidate;

/// Holds local candidates until the description they belong to is on the wire.
#[derive(Debug, Default)]
pub(crate) struct CandidateBuffer {
    pending: Vec<IceCandidate>,
    open: bool,
}

impl CandidateBuffer {
    /// Returns the candidate back if it can be sent right away.
    pub(crate) fn push(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.open {
            Some(candidate)
        } else {
            self.pending.push(candidate);
            None
        }
    }

    /// Mark the local description as sent and take everything buffered so far.
    pub(crate) fn open(&mut self) -> Vec<IceCandidate> {
        self.open = true;
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_wait_for_description() {
        let mut buffer = CandidateBuffer::default();
        assert!(buffer.push(IceCandidate::new("a")).is_none());
        assert!(buffer.push(IceCandidate::new("b")).is_none());

        let flushed: Vec<_> = buffer.open().into_iter().map(|c| c.candidate).collect();
        assert_eq!(flushed, vec!["a", "b"]);

        assert_eq!(buffer.push(IceCandidate::new("c")), Some(IceCandidate::new("c")));
        assert!(buffer.open().is_empty());
    }
}
