mod common;

use common::Fixture;
use unionfs::{AccessMask, Credentials, ModeType, OverlayConfig, OvlError, RealInode};

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_permission_write_checks_lower_as_read() -> anyhow::Result<()> {
    let fixture = Fixture::new(OverlayConfig::default())?;
    let owner = Credentials::user(1000, 1000);
    let lower = fixture.lower_inode(ModeType::File, 0o644, 1000, 1000).await;
    fixture.lower_fs.set_read_only(true);

    let entry = fixture.entry(None, Some(lower.clone()), false).await?;
    fixture
        .overlay
        .permission(entry.get_inode(), AccessMask::WRITE, &owner)
        .await?;

    // Checked directly, the lower layer refuses writes.
    let direct = lower.permission(AccessMask::WRITE, &owner).await;
    assert!(matches!(direct, Err(OvlError::ReadOnlyFilesystem)));

    fixture.overlay.copy_up(&entry).await?;
    fixture
        .overlay
        .permission(entry.get_inode(), AccessMask::WRITE | AccessMask::APPEND, &owner)
        .await?;

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_permission_caller_check_comes_first() -> anyhow::Result<()> {
    let fixture = Fixture::new(OverlayConfig::default())?;
    let stranger = Credentials::user(2000, 2000);
    let lower = fixture.lower_inode(ModeType::File, 0o640, 1000, 1000).await;
    let entry = fixture.entry(None, Some(lower), false).await?;

    let result = fixture
        .overlay
        .permission(entry.get_inode(), AccessMask::READ, &stranger)
        .await;
    assert!(matches!(result, Err(OvlError::AccessDenied)));

    let member = Credentials::user(2000, 2000).with_groups([1000]);
    fixture
        .overlay
        .permission(entry.get_inode(), AccessMask::READ, &member)
        .await?;

    let result = fixture
        .overlay
        .permission(entry.get_inode(), AccessMask::WRITE, &member)
        .await;
    assert!(matches!(result, Err(OvlError::AccessDenied)));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_permission_mounter_check_applies() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(OverlayConfig::default())?;
    let lower = fixture.lower_inode(ModeType::File, 0o600, 1000, 1000).await;

    // A mounter that cannot read the real file blocks even a privileged caller.
    fixture.overlay = fixture
        .overlay
        .with_mounter(Credentials::user(3000, 3000));

    let entry = fixture.entry(None, Some(lower), false).await?;
    let result = fixture
        .overlay
        .permission(entry.get_inode(), AccessMask::READ, &Credentials::root())
        .await;
    assert!(matches!(result, Err(OvlError::AccessDenied)));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_permission_non_blocking() -> anyhow::Result<()> {
    let fixture = Fixture::new(OverlayConfig::default())?;
    let owner = Credentials::user(1000, 1000);
    let lower = fixture.lower_inode(ModeType::File, 0o644, 1000, 1000).await;
    let entry = fixture.entry(None, Some(lower), false).await?;

    fixture
        .overlay
        .permission(
            entry.get_inode(),
            AccessMask::READ | AccessMask::NOT_BLOCK,
            &owner,
        )
        .await?;

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_permission_symlink_skips_real_check() -> anyhow::Result<()> {
    let fixture = Fixture::new(OverlayConfig::default())?;
    let anyone = Credentials::user(2000, 2000);
    let ino = fixture.lower_fs.create_symlink("/etc/passwd", 0, 0).await;
    let lower = RealInode::new(fixture.lower.clone(), ino, ModeType::Symlink);
    fixture.lower_fs.set_read_only(true);

    let entry = fixture.entry(None, Some(lower), false).await?;
    fixture
        .overlay
        .permission(entry.get_inode(), AccessMask::WRITE, &anyone)
        .await?;

    Ok(())
}
