mod common;

use common::Fixture;
use unionfs::{
    defaults::OVERLAY_XATTR_NLINK, Credentials, InodeFlags, ModeType, NlinkUpdate, OverlayConfig,
    OvlError, RealFileSystem, XattrFlags,
};

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_nlink_indexed_hardlink_across_copy_up() -> anyhow::Result<()> {
    let config = OverlayConfig::builder().index(true).build();
    let fixture = Fixture::new(config)?;
    let root = Credentials::root();

    let lower = fixture.lower_inode(ModeType::File, 0o644, 0, 0).await;
    fixture.lower_fs.link(lower.get_ino()).await?;
    fixture.lower_fs.link(lower.get_ino()).await?;

    let entry = fixture.entry(None, Some(lower.clone()), true).await?;
    let inode = entry.get_inode().clone();
    assert!(inode.has_flag(InodeFlags::INDEXED));
    assert_eq!(fixture.overlay.getattr(&entry).await?.nlink, 3);

    // Copy-up links the index entry, so the upper file has two links.
    let upper = fixture.overlay.copy_up(&entry).await?;
    assert_eq!(upper.getattr(&root).await?.nlink, 2);
    assert_eq!(upper.getxattr(OVERLAY_XATTR_NLINK, &root).await?, b"L+0");
    assert_eq!(fixture.overlay.getattr(&entry).await?.nlink, 3);

    // Unlink one of the overlay names.
    let change = fixture.overlay.nlink_start(&entry).await?;
    assert_eq!(upper.getxattr(OVERLAY_XATTR_NLINK, &root).await?, b"U+1");
    fixture.upper_fs.unlink(upper.get_ino()).await?;
    assert_eq!(change.commit(NlinkUpdate::Decrement), 2);
    assert_eq!(fixture.overlay.getattr(&entry).await?.nlink, 2);

    // A fresh lookup recovers the count from the ledger.
    assert!(fixture.overlay.evict(&inode));
    let entry = fixture
        .entry(Some(upper.clone()), Some(lower.clone()), true)
        .await?;
    assert_eq!(entry.get_inode().nlink(), 2);
    assert_eq!(fixture.overlay.getattr(&entry).await?.nlink, 2);
    assert_eq!(
        fixture.overlay.getattr(&entry).await?.ino,
        lower.get_ino(),
        "indexed inode keeps the origin number"
    );

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_nlink_tag_relative_to_lower() -> anyhow::Result<()> {
    let fixture = Fixture::new(OverlayConfig::default())?;
    let root = Credentials::root();

    let lower = fixture.lower_inode(ModeType::File, 0o644, 0, 0).await;
    fixture.lower_fs.link(lower.get_ino()).await?;
    let upper = fixture.upper_inode(ModeType::File, 0o644, 0, 0).await;
    upper
        .setxattr(OVERLAY_XATTR_NLINK, b"L+1", XattrFlags::Any, &root)
        .await?;

    let entry = fixture.entry(Some(upper), Some(lower), false).await?;
    assert_eq!(entry.get_inode().nlink(), 3);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_nlink_malformed_tag_falls_back() -> anyhow::Result<()> {
    let fixture = Fixture::new(OverlayConfig::default())?;
    let root = Credentials::root();

    for tag in [&b"X+3"[..], b"L", b"U+99999999999", b"L-5"] {
        let lower = fixture.lower_inode(ModeType::File, 0o644, 0, 0).await;
        fixture.lower_fs.link(lower.get_ino()).await?;
        let upper = fixture.upper_inode(ModeType::File, 0o644, 0, 0).await;
        upper
            .setxattr(OVERLAY_XATTR_NLINK, tag, XattrFlags::Any, &root)
            .await?;

        let entry = fixture.entry(Some(upper), Some(lower), false).await?;
        assert_eq!(entry.get_inode().nlink(), 1, "tag {:?}", tag);
    }

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_nlink_bracket_holds_write_reservation() -> anyhow::Result<()> {
    let fixture = Fixture::new(OverlayConfig::default())?;
    let lower = fixture.lower_inode(ModeType::File, 0o644, 0, 0).await;
    let entry = fixture.entry(None, Some(lower.clone()), false).await?;

    let change = fixture.overlay.nlink_start(&entry).await?;
    assert!(lower.try_lock().is_none());
    assert!(matches!(
        fixture.overlay.remount_read_only(),
        Err(OvlError::Busy(1))
    ));

    assert_eq!(change.commit(NlinkUpdate::Increment), 2);
    assert!(lower.try_lock().is_some());

    fixture.overlay.remount_read_only()?;
    assert!(matches!(
        fixture.overlay.nlink_start(&entry).await,
        Err(OvlError::ReadOnlyFilesystem)
    ));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_nlink_bracket_dropped_without_commit() -> anyhow::Result<()> {
    let fixture = Fixture::new(OverlayConfig::default())?;
    let upper = fixture.upper_inode(ModeType::File, 0o644, 0, 0).await;
    let entry = fixture.entry(Some(upper), None, false).await?;

    let change = fixture.overlay.nlink_start(&entry).await?;
    drop(change);

    assert_eq!(entry.get_inode().nlink(), 1);
    fixture.overlay.remount_read_only()?;

    // Not indexed, so nothing was recorded.
    let upper = entry.get_inode().upper().expect("upper");
    assert!(matches!(
        fixture
            .upper_fs
            .getxattr(upper.get_ino(), OVERLAY_XATTR_NLINK, &Credentials::root())
            .await,
        Err(OvlError::NoAttribute(_))
    ));

    Ok(())
}
