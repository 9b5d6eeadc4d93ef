use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

/// How long a writer waits on a lock held by another connection to the same file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a connection to a database file that other stores share.
pub(crate) fn open_shared(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}
