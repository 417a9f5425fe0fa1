use crate::dvar::types::{DistVarId, DistVarType};

/// Decides the value an owned variable takes when a set-point is requested.
///
/// The callback receives the variable ID, its present value and the proposed
/// value, and returns the value the variable should hold. Returning `old`
/// rejects the change; returning anything else accepts it, possibly coerced.
///
/// Callbacks run inside the registry critical section. They must return
/// promptly and must never block or call into the RTOS; a callback that
/// suspends stalls every DVAR operation on the node. A callback must not
/// re-enter the node either, not even to read another variable.
#[derive(Debug, Clone, Copy)]
pub enum SetPointCallback {
    /// Accept any requested value.
    AcceptAny,
    /// Reject every request (read-only variables).
    AcceptNone,
    /// Application-defined filter.
    Custom(fn(DistVarId, DistVarType, DistVarType) -> DistVarType),
}

impl SetPointCallback {
    /// Returns the value the variable should take.
    #[inline]
    pub fn apply(&self, id: DistVarId, old: DistVarType, new: DistVarType) -> DistVarType {
        match self {
            SetPointCallback::AcceptAny => new,
            SetPointCallback::AcceptNone => old,
            SetPointCallback::Custom(f) => f(id, old, new),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clamp_to_100(_id: DistVarId, _old: DistVarType, new: DistVarType) -> DistVarType {
        new.min(100)
    }

    #[test]
    fn builtin_callbacks() {
        assert_eq!(SetPointCallback::AcceptAny.apply(1, 5, 9), 9);
        assert_eq!(SetPointCallback::AcceptNone.apply(1, 5, 9), 5);
    }

    #[test]
    fn custom_callback_may_coerce() {
        let cb = SetPointCallback::Custom(clamp_to_100);
        assert_eq!(cb.apply(1, 5, 50), 50);
        assert_eq!(cb.apply(1, 5, 500), 100);
    }
}
