//! Backend data types

use serde::{Deserialize, Serialize};

/// One directory listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub name: String,
    /// Absolute remote path
    pub path: String,
    pub is_dir: bool,
    /// Size in bytes (meaningless for directories)
    pub size: u64,
    /// Modification time (Unix timestamp, seconds)
    pub modified: i64,
    /// Low 9 permission bits, when the protocol reports them
    pub permissions: Option<u32>,
}

impl RemoteFile {
    /// Permissions rendered the way `ls -l` does (`rwxr-xr-x`)
    pub fn permission_string(&self) -> Option<String> {
        self.permissions.map(|mode| {
            let mut out = String::with_capacity(9);
            for shift in [6u32, 3, 0] {
                let bits = (mode >> shift) & 0o7;
                out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
                out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
                out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
            }
            out
        })
    }
}
