use flatfs::io::{BlockStorage, FileBlockEmulator, FileBlockEmulatorBuilder};
use flatfs::{FileKind, FlatFs, FsError, Resource, SuperBlock, MAX_FILE_PAGES, PAGE_SIZE};
use tempfile::NamedTempFile;

fn fresh_fs() -> FlatFs<FileBlockEmulator> {
    let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
        .with_block_count(SuperBlock::image_blocks())
        .build()
        .unwrap();
    FlatFs::create(dev).unwrap()
}

#[test]
fn can_initialize_disk_with_filesystem() {
    let tf = NamedTempFile::new().unwrap();

    // Prepare the image, then mount it again from its path.
    FlatFs::format_path(tf.path()).unwrap();
    let mut fs = FlatFs::mount_path(tf.path()).unwrap();

    assert_eq!(fs.pwd(), "/");
    let root = fs.stat("/").unwrap();
    assert_eq!(root.kind, FileKind::Directory);
    assert_eq!(root.inode, 0);
}

#[test]
fn unformatted_image_is_rejected() {
    let tf = NamedTempFile::new().unwrap();
    match FlatFs::mount_path(tf.path()) {
        Err(FsError::InvalidImage(_)) => (),
        Err(e) => panic!("Unexpected error type: {}", e),
        Ok(_) => panic!("mounted an empty file"),
    }

    // Right size but never formatted.
    let dev = FileBlockEmulatorBuilder::from(tf.reopen().unwrap())
        .with_block_count(SuperBlock::image_blocks())
        .build()
        .unwrap();
    assert!(matches!(FlatFs::open(dev), Err(FsError::InvalidImage(_))));
}

#[test]
fn missing_image_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        FlatFs::mount_path(dir.path().join("absent.dat")),
        Err(FsError::NotFound(_))
    ));
}

#[test]
fn default_image_is_created_then_reused() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join(flatfs::DEFAULT_IMAGE);
    {
        let mut fs = FlatFs::open_or_format(&image).unwrap();
        fs.create_file("/marker").unwrap();
    }
    let mut fs = FlatFs::open_or_format(&image).unwrap();
    assert!(fs.stat("/marker").is_ok());
}

#[test]
fn pwd_follows_cd() {
    let mut fs = fresh_fs();
    fs.create_directory("/a").unwrap();
    fs.create_directory("/a/b").unwrap();
    fs.cd("/a/b").unwrap();
    assert_eq!(fs.pwd(), "/a/b");

    fs.cd("..").unwrap();
    assert_eq!(fs.pwd(), "/a");
    fs.create_file("relative").unwrap();
    assert_eq!(fs.stat("/a/relative").unwrap().kind, FileKind::Regular);
}

#[test]
fn write_then_read_hello() {
    let mut fs = fresh_fs();
    fs.create_file("f").unwrap();
    fs.write_file("f", b"hello").unwrap();
    assert_eq!(fs.read_file("f").unwrap(), b"hello");
    assert_eq!(fs.stat("f").unwrap().size, 5);
}

#[test]
fn hard_link_survives_deleting_the_original() {
    let mut fs = fresh_fs();
    fs.create_file("/orig").unwrap();
    fs.write_file("/orig", b"payload").unwrap();
    fs.link("/orig", "/alias").unwrap();
    assert_eq!(fs.stat("/alias").unwrap().link_count, 2);

    assert_eq!(fs.delete_file("/orig").unwrap(), 1);
    assert_eq!(fs.read_file("/alias").unwrap(), b"payload");
    assert!(matches!(fs.stat("/orig"), Err(FsError::NotFound(_))));
}

#[test]
fn append_fills_exactly_ten_pages() {
    let mut fs = fresh_fs();
    fs.create_file("/big").unwrap();
    let limit = MAX_FILE_PAGES * PAGE_SIZE;
    fs.append_to_file("/big", &vec![b'a'; limit - 100]).unwrap();
    fs.append_to_file("/big", &vec![b'b'; 100]).unwrap();
    assert_eq!(fs.stat("/big").unwrap().size, limit as u64);

    assert!(matches!(
        fs.append_to_file("/big", b"!"),
        Err(FsError::ResourceExhausted(Resource::FilePages))
    ));
    let content = fs.read_file("/big").unwrap();
    assert_eq!(content.len(), limit);
    assert!(content[limit - 100..].iter().all(|&b| b == b'b'));
}

fn build_chain(fs: &mut FlatFs<FileBlockEmulator>, links: usize) {
    fs.create_file("/end").unwrap();
    fs.write_file("/end", b"reached").unwrap();
    let mut target = "/end".to_string();
    for i in (1..=links).rev() {
        let name = format!("/hop{}", i);
        fs.symlink(&target, &name).unwrap();
        target = name;
    }
}

#[test]
fn chain_of_nine_symlinks_resolves() {
    let mut fs = fresh_fs();
    build_chain(&mut fs, 9);
    assert_eq!(fs.read_file("/hop1").unwrap(), b"reached");
    assert_eq!(fs.read_link("/hop1").unwrap(), "/hop2");
}

#[test]
fn chain_of_eleven_symlinks_is_too_long() {
    let mut fs = fresh_fs();
    build_chain(&mut fs, 11);
    assert!(matches!(fs.read_file("/hop1"), Err(FsError::TooManyLinks)));
    assert_eq!(fs.read_file("/hop2").unwrap(), b"reached");
}

#[test]
fn directory_is_empty_with_only_dot_entries() {
    let mut fs = fresh_fs();
    fs.create_directory("/d").unwrap();
    assert_eq!(fs.list_directory("/d").unwrap().len(), 2);

    fs.create_file("/d/f").unwrap();
    assert!(matches!(fs.delete_directory("/d"), Err(FsError::NotEmpty(_))));
    fs.delete_file("/d/f").unwrap();
    fs.delete_directory("/d").unwrap();
    assert!(matches!(fs.stat("/d"), Err(FsError::NotFound(_))));
}

#[test]
fn contents_persist_across_remount() {
    let tf = NamedTempFile::new().unwrap();
    {
        let mut fs = FlatFs::format_path(tf.path()).unwrap();
        fs.create_directory("/docs").unwrap();
        fs.create_file("/docs/readme").unwrap();
        fs.write_file("/docs/readme", b"persisted").unwrap();
        fs.change_permissions("/docs/readme", "r--").unwrap();
        fs.cd("/docs").unwrap();
    }

    let mut fs = FlatFs::mount_path(tf.path()).unwrap();
    assert_eq!(fs.pwd(), "/");
    assert_eq!(fs.read_file("/docs/readme").unwrap(), b"persisted");
    let (kind, bits) = fs.show_permissions("/docs/readme").unwrap();
    assert_eq!(kind, FileKind::Regular);
    assert_eq!(flatfs::describe_permissions(bits), "r--");
    assert!(matches!(
        fs.write_file("/docs/readme", b"nope"),
        Err(FsError::PermissionDenied(_))
    ));
}

#[test]
fn format_wipes_everything() {
    let mut fs = fresh_fs();
    fs.create_directory("/gone").unwrap();
    fs.cd("/gone").unwrap();
    fs.format().unwrap();
    assert_eq!(fs.pwd(), "/");
    assert!(fs.stat("/gone").is_err());
    assert_eq!(fs.list_directory("/").unwrap().len(), 2);
}

#[test]
fn forced_removal_asks_first() {
    let mut fs = fresh_fs();
    fs.create_directory("/t").unwrap();
    fs.create_directory("/t/sub").unwrap();
    fs.create_file("/t/sub/f").unwrap();
    fs.write_file("/t/sub/f", b"data").unwrap();

    assert!(matches!(
        fs.delete_directory_force("/t", |_| false),
        Err(FsError::Cancelled)
    ));
    assert!(fs.stat("/t/sub/f").is_ok());

    fs.delete_directory_force("/t", |path| path == "/t").unwrap();
    assert!(fs.stat("/t").is_err());
    let sb = fs.super_block();
    assert_eq!(sb.inodes.used_count(), 1);
    assert_eq!(sb.pages.used_count(), 0);
}

#[test]
fn moved_directories_need_a_free_name_outside_themselves() {
    let mut fs = fresh_fs();
    fs.create_directory("/a").unwrap();
    fs.create_directory("/a/b").unwrap();
    assert!(matches!(fs.move_directory("/a", "/a/b/a"), Err(FsError::Cycle(_))));

    fs.create_directory("/c").unwrap();
    assert!(matches!(fs.move_directory("/a", "/c"), Err(FsError::AlreadyExists(_))));
    assert!(fs.stat("/a/b").is_ok());

    fs.move_directory("/a", "/c/a").unwrap();
    fs.cd("/c/a/b/../..").unwrap();
    assert_eq!(fs.pwd(), "/c");
}

#[test]
fn copy_and_move_files() {
    let mut fs = fresh_fs();
    fs.create_directory("/dst").unwrap();
    fs.create_file("/src").unwrap();
    fs.write_file("/src", b"copy me").unwrap();

    fs.copy_file("/src", "/dst").unwrap();
    assert_eq!(fs.read_file("/dst/src").unwrap(), b"copy me");
    fs.move_file("/src", "renamed").unwrap();
    assert_eq!(fs.read_file("/renamed").unwrap(), b"copy me");
    assert_ne!(
        fs.stat("/renamed").unwrap().inode,
        fs.stat("/dst/src").unwrap().inode
    );
}

#[test]
fn head_tail_and_usage() {
    let mut fs = fresh_fs();
    fs.create_directory("/logs").unwrap();
    fs.create_file("/logs/today").unwrap();
    fs.write_file("/logs/today", b"1\n2\n3\n").unwrap();
    fs.append_to_file("/logs/today", b"4\n").unwrap();

    assert_eq!(fs.head("/logs/today", 1).unwrap(), b"1\n");
    assert_eq!(fs.tail("/logs/today", 2).unwrap(), b"3\n4\n");
    let usage = fs.disk_usage("/logs").unwrap();
    assert_eq!(usage, 3 * flatfs::DIRENT_SIZE + 8);
}

#[test]
fn tree_reports_symlink_targets() {
    let mut fs = fresh_fs();
    fs.create_directory("/d").unwrap();
    fs.create_file("/d/f").unwrap();
    fs.symlink("/d/f", "/d/l").unwrap();

    let rows = fs.tree("/").unwrap();
    let names: Vec<_> = rows.iter().map(|row| row.name.as_str()).collect();
    assert_eq!(names, vec!["d", "f", "l"]);
    assert_eq!(rows[2].target.as_deref(), Some("/d/f"));
    fs.unlink("/d/l").unwrap();
    assert_eq!(fs.tree("/d").unwrap().len(), 1);
}

#[test]
fn device_is_handed_back_intact() {
    let mut fs = fresh_fs();
    fs.create_file("/keep").unwrap();
    let dev = fs.into_device();
    assert_eq!(dev.block_count(), SuperBlock::image_blocks());
    let mut fs = FlatFs::open(dev).unwrap();
    assert!(fs.stat("/keep").is_ok());
}
