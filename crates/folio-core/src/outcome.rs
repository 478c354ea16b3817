use crate::FolioError;

/// Result of a best-effort operation.
///
/// Cache and conversation-memory calls never propagate failures to their
/// caller. Instead of collapsing every problem into "nothing", they report
/// which of three things happened so the call site can pick its policy.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The operation ran against its backing service.
    Ready(T),
    /// The component has no backing service configured.
    Disabled,
    /// The backing service was configured but the call failed.
    Failed(FolioError),
}

impl<T> Outcome<T> {
    /// Returns `true` for [`Outcome::Ready`].
    pub fn is_ready(&self) -> bool {
        matches!(self, Outcome::Ready(_))
    }

    /// Returns `true` for [`Outcome::Disabled`].
    pub fn is_disabled(&self) -> bool {
        matches!(self, Outcome::Disabled)
    }

    /// Returns `true` for [`Outcome::Failed`].
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// The value when ready, `None` otherwise.
    pub fn ready(self) -> Option<T> {
        match self {
            Outcome::Ready(value) => Some(value),
            Outcome::Disabled | Outcome::Failed(_) => None,
        }
    }

    /// Map the ready value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ready(value) => Outcome::Ready(f(value)),
            Outcome::Disabled => Outcome::Disabled,
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }
}

impl<T: Default> Outcome<T> {
    /// The value when ready, `T::default()` when disabled or failed.
    pub fn unwrap_or_default(self) -> T {
        self.ready().unwrap_or_default()
    }
}

impl<T> From<Result<T, FolioError>> for Outcome<T> {
    fn from(result: Result<T, FolioError>) -> Self {
        match result {
            Ok(value) => Outcome::Ready(value),
            Err(e) => Outcome::Failed(e),
        }
    }
}
