use std::path::Path;

use crate::admin::options::AdminOpenOptions;
use crate::admin::{AdminError, Result};
use crate::primitives::io::Location;
use crate::store::params::PARAMS_FILE;
use crate::store::Store;

/// Opens the directory store at `path`.
///
/// A directory without `tdb.cfg` is only accepted when
/// `create_if_missing` is set.
pub fn open_store(path: &Path, opts: &AdminOpenOptions) -> Result<Store> {
    if !opts.create_if_missing && !path.join(PARAMS_FILE).exists() {
        return Err(AdminError::missing_store(path));
    }
    let location = Location::dir(path)?;
    Ok(Store::open(location, opts.params.clone())?)
}
