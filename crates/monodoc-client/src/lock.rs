//! Row lock clause compilation.

use monodoc_common::{
    Result,
    protocol::{LockContention, LockDirective, LockMode, LockOptions, RowLock, ServerVersion},
};

/// Map a lock request onto the protocol directive for `server_version`.
///
/// `NoWait` and `SkipLocked` are passed on to servers that predate them. The
/// server reports the resulting failure and it is not translated here.
pub fn compile_lock(
    mode: LockMode,
    contention: LockContention,
    server_version: ServerVersion,
) -> Result<Option<LockDirective>> {
    let row_lock = match mode {
        LockMode::None => return Ok(None),
        LockMode::Shared => RowLock::Shared,
        LockMode::Exclusive => RowLock::Exclusive,
    };

    if !server_version.supports(ServerVersion::ROW_LOCKING) {
        return Err(ServerVersion::unsupported(ServerVersion::ROW_LOCKING));
    }

    let options = match contention {
        LockContention::Default => None,
        LockContention::NoWait => Some(LockOptions::NoWait),
        LockContention::SkipLocked => Some(LockOptions::SkipLocked),
    };

    Ok(Some(LockDirective { row_lock, options }))
}
