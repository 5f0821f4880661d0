mod common;

use std::{path::PathBuf, sync::Arc};

use common::{Fixture, LOWER_DEV, UPPER_DEV};
use unionfs::{
    defaults::OVERLAY_XATTR_ORIGIN, AclKind, Credentials, MemoryRealFs, ModeType, OverlayConfig,
    OvlError, RealFileSystem, RealInode, XattrFlags,
};

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_setxattr_copies_up() -> anyhow::Result<()> {
    let fixture = Fixture::new(OverlayConfig::default())?;
    let owner = Credentials::user(1000, 1000);
    let root = Credentials::root();
    let lower = fixture.lower_inode(ModeType::File, 0o644, 1000, 1000).await;
    let entry = fixture.entry(None, Some(lower.clone()), false).await?;

    fixture
        .overlay
        .setxattr(&entry, "user.tag", b"blue", XattrFlags::Create, &owner)
        .await?;

    let upper = entry.get_inode().upper().expect("copied up");
    assert_eq!(upper.getxattr("user.tag", &root).await?, b"blue");
    assert!(matches!(
        lower.getxattr("user.tag", &root).await,
        Err(OvlError::NoAttribute(_))
    ));
    assert_eq!(
        fixture
            .overlay
            .getxattr(entry.get_inode(), "user.tag", &owner)
            .await?,
        b"blue"
    );

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_removexattr_missing_does_not_copy_up() -> anyhow::Result<()> {
    let fixture = Fixture::new(OverlayConfig::default())?;
    let owner = Credentials::user(1000, 1000);
    let lower = fixture.lower_inode(ModeType::File, 0o644, 1000, 1000).await;
    let entry = fixture.entry(None, Some(lower), false).await?;

    let result = fixture
        .overlay
        .removexattr(&entry, "user.missing", &owner)
        .await;
    assert!(matches!(result, Err(OvlError::NoAttribute(_))));
    assert!(!entry.get_inode().has_upper());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_removexattr_hides_lower_value() -> anyhow::Result<()> {
    let fixture = Fixture::new(OverlayConfig::default())?;
    let owner = Credentials::user(1000, 1000);
    let lower = fixture.lower_inode(ModeType::File, 0o644, 1000, 1000).await;
    fixture
        .lower_fs
        .setxattr(lower.get_ino(), "user.tag", b"red", XattrFlags::Any, &owner)
        .await?;

    let entry = fixture.entry(None, Some(lower.clone()), false).await?;
    fixture
        .overlay
        .removexattr(&entry, "user.tag", &owner)
        .await?;

    assert!(entry.get_inode().has_upper());
    assert!(matches!(
        fixture
            .overlay
            .getxattr(entry.get_inode(), "user.tag", &owner)
            .await,
        Err(OvlError::NoAttribute(_))
    ));
    assert_eq!(lower.getxattr("user.tag", &owner).await?, b"red");

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_private_xattrs_are_unreachable() -> anyhow::Result<()> {
    let fixture = Fixture::new(OverlayConfig::default())?;
    let root = Credentials::root();
    let lower = fixture.lower_inode(ModeType::File, 0o644, 0, 0).await;
    let entry = fixture.entry(None, Some(lower), false).await?;
    fixture.overlay.copy_up(&entry).await?;

    assert!(matches!(
        fixture
            .overlay
            .getxattr(entry.get_inode(), OVERLAY_XATTR_ORIGIN, &root)
            .await,
        Err(OvlError::NotSupported(_))
    ));
    assert!(matches!(
        fixture
            .overlay
            .setxattr(&entry, "trusted.overlay.opaque", b"y", XattrFlags::Any, &root)
            .await,
        Err(OvlError::NotSupported(_))
    ));

    let user = Credentials::user(1000, 1000);
    assert!(matches!(
        fixture
            .overlay
            .setxattr(&entry, "trusted.note", b"x", XattrFlags::Any, &user)
            .await,
        Err(OvlError::NotPermitted(_))
    ));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_listxattr_filters_by_namespace() -> anyhow::Result<()> {
    let fixture = Fixture::new(OverlayConfig::default())?;
    let root = Credentials::root();
    let user = Credentials::user(1000, 1000);
    let lower = fixture.lower_inode(ModeType::File, 0o644, 1000, 1000).await;
    fixture
        .lower_fs
        .setxattr(lower.get_ino(), "user.a", b"1", XattrFlags::Any, &root)
        .await?;
    fixture
        .lower_fs
        .setxattr(lower.get_ino(), "trusted.b", b"2", XattrFlags::Any, &root)
        .await?;

    let entry = fixture.entry(None, Some(lower), false).await?;
    fixture
        .overlay
        .setxattr(&entry, "user.c", b"3", XattrFlags::Any, &user)
        .await?;

    let upper = entry.get_inode().upper().expect("copied up");
    assert!(upper.getxattr(OVERLAY_XATTR_ORIGIN, &root).await.is_ok());

    let inode = entry.get_inode();
    assert_eq!(
        fixture.overlay.listxattr(inode, &user).await?,
        vec!["user.a", "user.c"]
    );
    assert_eq!(
        fixture.overlay.listxattr(inode, &root).await?,
        vec!["trusted.b", "user.a", "user.c"]
    );

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_acl_follows_layer_support() -> anyhow::Result<()> {
    let upper_fs = Arc::new(MemoryRealFs::new(UPPER_DEV));
    let lower_fs = Arc::new(MemoryRealFs::new(LOWER_DEV).with_acl());
    let fixture = Fixture::build(OverlayConfig::default(), upper_fs, lower_fs)?;

    let lower = fixture.lower_inode(ModeType::File, 0o644, 0, 0).await;
    fixture
        .lower_fs
        .set_acl(lower.get_ino(), AclKind::Access, b"u::rw-")
        .await?;
    let entry = fixture.entry(None, Some(lower), false).await?;
    let inode = entry.get_inode();

    assert_eq!(
        fixture.overlay.get_acl(inode, AclKind::Access).await?,
        Some(b"u::rw-".to_vec())
    );
    assert_eq!(fixture.overlay.get_acl(inode, AclKind::Default).await?, None);

    // The upper layer has no ACL support.
    fixture.overlay.copy_up(&entry).await?;
    assert_eq!(fixture.overlay.get_acl(inode, AclKind::Access).await?, None);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_readlink() -> anyhow::Result<()> {
    let fixture = Fixture::new(OverlayConfig::default())?;
    let ino = fixture.lower_fs.create_symlink("../target", 0, 0).await;
    let link = RealInode::new(fixture.lower.clone(), ino, ModeType::Symlink);
    let file = fixture.lower_inode(ModeType::File, 0o644, 0, 0).await;

    let entry = fixture.entry(None, Some(link), false).await?;
    assert_eq!(
        fixture.overlay.readlink(entry.get_inode()).await?,
        PathBuf::from("../target")
    );
    assert_eq!(
        fixture
            .overlay
            .get_acl(entry.get_inode(), AclKind::Access)
            .await?,
        None
    );

    let entry = fixture.entry(None, Some(file), false).await?;
    assert!(matches!(
        fixture.overlay.readlink(entry.get_inode()).await,
        Err(OvlError::NotASymlink(_))
    ));

    Ok(())
}
