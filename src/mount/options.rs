//! Unmount option flags (spec §3, §4.4, §9 open question).
//!
//! The original protocol's `detach` field is validated with a condition
//! whose intent is ambiguous (`!detach || expire`). We preserve only the
//! observable behavior that matters: `detach` is mandatory (it's how the
//! broker gets the mount to disappear from the namespace immediately) and
//! `expire` is never honored. Any request that asks for `detach: false` or
//! `expire: true` is a validation error rather than a silently-ignored
//! option.

use crate::error::BrokerError;
use crate::proto::codec::{Reader, Writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnmountOptions {
    pub force: bool,
    pub detach: bool,
    pub expire: bool,
}

impl UnmountOptions {
    pub fn encode(&self, w: &mut Writer) {
        w.bool(self.force);
        w.bool(self.detach);
        w.bool(self.expire);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, BrokerError> {
        Ok(UnmountOptions {
            force: r.bool()?,
            detach: r.bool()?,
            expire: r.bool()?,
        })
    }

    /// Reject combinations the broker doesn't implement, per the §9 open
    /// question: only `force` is a real, honored option today.
    pub fn check(&self) -> Result<(), BrokerError> {
        if !self.detach {
            return Err(BrokerError::validation(
                "unmount without detach is not supported",
            ));
        }
        if self.expire {
            return Err(BrokerError::validation(
                "unmount with expire is not supported",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_detach_true_passes_check() {
        let opts = UnmountOptions {
            force: true,
            detach: true,
            expire: false,
        };
        assert!(opts.check().is_ok());
    }

    #[test]
    fn no_detach_is_rejected() {
        let opts = UnmountOptions {
            force: false,
            detach: false,
            expire: false,
        };
        assert!(opts.check().is_err());
    }

    #[test]
    fn expire_is_rejected() {
        let opts = UnmountOptions {
            force: false,
            detach: true,
            expire: true,
        };
        assert!(opts.check().is_err());
    }
}
