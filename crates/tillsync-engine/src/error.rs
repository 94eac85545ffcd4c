use tillsync_store::{StoreError, StoreKind};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{} store: {}", .side.as_str(), .source)]
    Store {
        side: StoreKind,
        #[source]
        source: StoreError,
    },

    /// A referenced row has no chain id yet.
    #[error("unsynced dependency: {0}")]
    Dependency(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("{} store not connected", .0.as_str())]
    NotConnected(StoreKind),
}

impl SyncError {
    /// The one predicate the orchestrator uses to decide between demoting an
    /// endpoint and skipping a row.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Store { source, .. } => source.is_connectivity(),
            Self::NotConnected(_) => true,
            Self::Dependency(_) | Self::Invariant(_) => false,
        }
    }

    /// Which endpoint a connectivity error came from.
    pub fn side(&self) -> Option<StoreKind> {
        match self {
            Self::Store { side, .. } | Self::NotConnected(side) => Some(*side),
            Self::Dependency(_) | Self::Invariant(_) => None,
        }
    }

    /// Malformed data rather than a missing dependency; logged at error level.
    pub fn is_invariant(&self) -> bool {
        matches!(
            self,
            Self::Invariant(_)
                | Self::Store {
                    source: StoreError::CorruptRow { .. },
                    ..
                }
        )
    }
}

/// Tags a store result with the endpoint it came from.
pub(crate) trait StoreResultExt<T> {
    fn local(self) -> Result<T, SyncError>;
    fn chain(self) -> Result<T, SyncError>;
}

impl<T> StoreResultExt<T> for Result<T, StoreError> {
    fn local(self) -> Result<T, SyncError> {
        self.map_err(|source| SyncError::Store {
            side: StoreKind::Local,
            source,
        })
    }

    fn chain(self) -> Result<T, SyncError> {
        self.map_err(|source| SyncError::Store {
            side: StoreKind::Chain,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_connection_loss_is_connectivity() {
        let err: Result<(), _> = Err(StoreError::Connection("reset".into()));
        let err = err.chain().unwrap_err();
        assert!(err.is_connectivity());
        assert_eq!(err.side(), Some(StoreKind::Chain));
        assert_eq!(err.to_string(), "chain store: connection error: reset");
    }

    #[test]
    fn data_errors_are_not_connectivity() {
        assert!(!SyncError::Dependency("account 3".into()).is_connectivity());
        let err: Result<(), _> = Err(StoreError::Conflict("dup".into()));
        assert!(!err.local().unwrap_err().is_connectivity());
    }

    #[test]
    fn corrupt_rows_are_invariant_violations() {
        let err = SyncError::Store {
            side: StoreKind::Local,
            source: StoreError::CorruptRow {
                table: "orders",
                column: "status",
                detail: "unknown variant".into(),
            },
        };
        assert!(err.is_invariant());
        assert!(!err.is_connectivity());
        assert!(!SyncError::Dependency("x".into()).is_invariant());
    }

    #[test]
    fn not_connected_names_endpoint() {
        let err = SyncError::NotConnected(StoreKind::Local);
        assert!(err.is_connectivity());
        assert_eq!(err.to_string(), "local store not connected");
    }
}
