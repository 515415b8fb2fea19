use crate::store::StoreParams;

/// Common options used when opening a store for administrative commands.
#[derive(Clone, Debug)]
pub struct AdminOpenOptions {
    /// Parameters passed to [`Store::open`](crate::store::Store::open).
    pub params: StoreParams,
    /// Whether to create the store if the directory holds none.
    pub create_if_missing: bool,
}

impl Default for AdminOpenOptions {
    fn default() -> Self {
        Self {
            params: StoreParams::small(),
            create_if_missing: false,
        }
    }
}
