/// Options forwarded to attribute assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Suppress change notifications for this assignment.
    pub silent: bool,
    /// Run the entity type's validator before committing.
    pub validate: bool,
}

impl SetOptions {
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    pub fn validated() -> Self {
        Self {
            validate: true,
            ..Self::default()
        }
    }
}

/// Options for converting an entity graph back to plain values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonOptions {
    /// Emit each many-relation's tombstones under `deleted_<key>`.
    pub with_deleted: bool,
    /// Rename relations to `<key>_attributes` and append tombstones to the live list.
    pub nested: bool,
}

impl JsonOptions {
    pub fn with_deleted() -> Self {
        Self {
            with_deleted: true,
            ..Self::default()
        }
    }

    pub fn nested() -> Self {
        Self {
            nested: true,
            ..Self::default()
        }
    }
}
