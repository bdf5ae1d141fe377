//! inline data through the file and directory operations
use crate::{
    fs::{
        DirCursor, MyFS, WriteBegin, FIEMAP_EXTENT_DATA_INLINE, FIEMAP_EXTENT_LAST, FIEMAP_EXTENT_NOT_ALIGNED, ROOT_INODE,
    },
    mkfs::{mkfs, MkfsOptions},
    utils::test_util::{init_logger, new_test_fs},
};

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

fn new_file(fs: &MyFS, name: &str) -> u64 {
    fs.create(ROOT_INODE, name, 0o644).unwrap().inode_number
}

fn names(fs: &MyFS, dir: u64) -> Vec<String> {
    let mut cursor = DirCursor::default();
    fs.readdir(dir, &mut cursor, usize::MAX)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect()
}

#[test]
fn test_second_write_grows_the_extension() {
    let fs = new_test_fs();
    let free_blocks = fs.superblock().free_blocks_count;
    let ino = new_file(&fs, "small");
    let first = pattern(40, 1);
    let second = pattern(30, 100);

    assert_eq!(fs.write(ino, 0, &first).unwrap(), 40);
    assert!(fs.has_inline_data(ino).unwrap());
    assert_eq!(fs.inline_size(ino).unwrap(), 60);

    assert_eq!(fs.write(ino, 40, &second).unwrap(), 30);
    assert_eq!(fs.inline_size(ino).unwrap(), 70);
    let mut expected = first;
    expected.extend_from_slice(&second);
    assert_eq!(fs.read(ino, 0, 70).unwrap(), expected);
    assert_eq!(fs.getattr(ino).unwrap().file_size, 70);
    assert_eq!(fs.superblock().free_blocks_count, free_blocks);
}

#[test]
fn test_many_small_writes_read_back() {
    let fs = new_test_fs();
    let ino = new_file(&fs, "chunks");
    let max = fs.max_inline_size(ino).unwrap();
    assert_eq!(max, 256);
    let content = pattern(max, 7);
    for (i, chunk) in content.chunks(17).enumerate() {
        fs.write(ino, (i * 17) as u64, chunk).unwrap();
    }
    assert!(fs.has_inline_data(ino).unwrap());
    assert_eq!(fs.inline_size(ino).unwrap(), max);
    assert_eq!(fs.read(ino, 0, max + 10).unwrap(), content);
    assert_eq!(fs.read(ino, 100, 50).unwrap(), content[100..150]);
}

#[test]
fn test_truncate_keeps_enough_capacity() {
    let fs = new_test_fs();
    let ino = new_file(&fs, "shrinking");
    let content = pattern(150, 3);
    fs.write(ino, 0, &content).unwrap();

    fs.truncate(ino, 100).unwrap();
    assert!(fs.inline_size(ino).unwrap() >= 100);
    assert_eq!(fs.read(ino, 0, 200).unwrap(), content[..100]);

    fs.truncate(ino, 20).unwrap();
    assert_eq!(fs.inline_size(ino).unwrap(), 60);
    assert_eq!(fs.read(ino, 0, 200).unwrap(), content[..20]);

    // growing again exposes zeros, not the old bytes
    fs.truncate(ino, 90).unwrap();
    assert!(fs.has_inline_data(ino).unwrap());
    assert_eq!(fs.inline_size(ino).unwrap(), 90);
    let mut expected = content[..20].to_vec();
    expected.resize(90, 0);
    assert_eq!(fs.read(ino, 0, 90).unwrap(), expected);

    fs.truncate(ino, 0).unwrap();
    assert!(!fs.has_inline_data(ino).unwrap());
    assert_eq!(fs.inline_size(ino).unwrap(), 0);
    assert!(fs.read(ino, 0, 10).unwrap().is_empty());
    assert!(fs.superblock().orphans.is_empty());

    // an emptied file may go inline again
    fs.write(ino, 0, b"again").unwrap();
    assert!(fs.has_inline_data(ino).unwrap());
    assert_eq!(fs.read(ino, 0, 5).unwrap(), b"again");
}

#[test]
fn test_write_past_the_maximum_converts() {
    let fs = new_test_fs();
    let ino = new_file(&fs, "big");
    let head = pattern(100, 9);
    fs.write(ino, 0, &head).unwrap();
    assert!(fs.has_inline_data(ino).unwrap());

    let tail = pattern(300, 200);
    fs.write(ino, 100, &tail).unwrap();
    assert!(!fs.has_inline_data(ino).unwrap());
    assert_eq!(fs.iomap(ino).unwrap_err(), libc::EAGAIN);
    let mut expected = head;
    expected.extend_from_slice(&tail);
    assert_eq!(fs.read(ino, 0, 400).unwrap(), expected);

    let extents = fs.fiemap(ino, 0, 400).unwrap();
    assert_eq!(extents[0].logical, 0);
    assert_eq!(extents.iter().map(|e| e.length).sum::<u64>(), 512);
    assert!(extents.iter().all(|e| e.flags & FIEMAP_EXTENT_DATA_INLINE == 0));
    assert_eq!(extents.last().unwrap().flags, FIEMAP_EXTENT_LAST);
}

#[test]
fn test_truncate_past_the_maximum_converts() {
    let fs = new_test_fs();
    let ino = new_file(&fs, "sparse");
    fs.write(ino, 0, b"header").unwrap();
    fs.truncate(ino, 1000).unwrap();
    assert!(!fs.has_inline_data(ino).unwrap());
    let content = fs.read(ino, 0, 2000).unwrap();
    assert_eq!(content.len(), 1000);
    assert_eq!(&content[..6], b"header");
    assert!(content[6..].iter().all(|b| *b == 0));
}

#[test]
fn test_explicit_conversion_keeps_content() {
    let fs = new_test_fs();
    let ino = new_file(&fs, "explicit");
    let content = pattern(120, 42);
    fs.write(ino, 0, &content).unwrap();
    fs.convert_inline_data(ino).unwrap();
    assert!(!fs.has_inline_data(ino).unwrap());
    assert_eq!(fs.read(ino, 0, 120).unwrap(), content);
    // a block based file stays block based
    fs.truncate(ino, 10).unwrap();
    fs.write(ino, 0, b"x").unwrap();
    assert!(!fs.has_inline_data(ino).unwrap());
    assert_eq!(fs.getattr(ino).unwrap().block_count, 1);
}

#[test]
fn test_failed_conversion_leaves_the_file_inline() {
    let fs = new_test_fs();
    let ino = new_file(&fs, "stuck");
    let content = pattern(100, 5);
    fs.write(ino, 0, &content).unwrap();
    fs.exhaust_data_blocks();

    assert_eq!(fs.write(ino, 250, &pattern(100, 0)).unwrap_err(), libc::ENOSPC);
    assert!(fs.has_inline_data(ino).unwrap());
    assert_eq!(fs.inline_size(ino).unwrap(), 100);
    assert_eq!(fs.read(ino, 0, 200).unwrap(), content);
    assert_eq!(fs.getattr(ino).unwrap().file_size, 100);

    // still usable inline
    fs.write(ino, 100, b"more").unwrap();
    assert_eq!(fs.read(ino, 100, 4).unwrap(), b"more");
}

#[test]
fn test_failed_directory_conversion_keeps_entries() {
    let fs = new_test_fs();
    let dir = fs.mkdir(ROOT_INODE, "full", 0o755).unwrap().inode_number;
    let mut created = Vec::new();
    for i in 0.. {
        let name = format!("f{i:02}");
        fs.exhaust_data_blocks();
        match fs.create(dir, &name, 0o644) {
            Ok(_) => created.push(name),
            Err(e) => {
                assert_eq!(e, libc::ENOSPC);
                break;
            }
        }
    }
    assert!(!created.is_empty());
    assert!(fs.has_inline_data(dir).unwrap());
    let listed = names(&fs, dir);
    assert_eq!(listed[2..], created[..]);
    for name in &created {
        fs.lookup(dir, name).unwrap();
    }
}

#[test]
fn test_insert_failing_after_conversion_keeps_the_inline_directory() {
    let fs = new_test_fs();
    let dir = fs.mkdir(ROOT_INODE, "packed", 0o755).unwrap().inode_number;
    let mut created = Vec::new();
    for i in 0.. {
        let name = format!("file{i:04}");
        fs.exhaust_data_blocks();
        match fs.create(dir, &name, 0o644) {
            Ok(_) => created.push(name),
            Err(_) => break,
        }
    }
    assert!(fs.has_inline_data(dir).unwrap());

    // the conversion gets the one free block, the long name needs another
    fs.leave_free_data_blocks(1);
    let long = "x".repeat(255);
    assert_eq!(fs.create(dir, &long, 0o644).unwrap_err(), libc::ENOSPC);
    assert!(fs.has_inline_data(dir).unwrap());
    assert_eq!(fs.getattr(dir).unwrap().block_count, 0);
    assert_eq!(fs.superblock().free_blocks_count, 1);
    assert_eq!(names(&fs, dir)[2..], created[..]);
    for name in &created {
        fs.lookup(dir, name).unwrap();
    }
    assert_eq!(fs.lookup(dir, &long).unwrap_err(), libc::ENOENT);

    fs.leave_free_data_blocks(2);
    fs.create(dir, &long, 0o644).unwrap();
    assert!(!fs.has_inline_data(dir).unwrap());
    for name in created.iter().chain([&long]) {
        fs.lookup(dir, name).unwrap();
    }
}

#[test]
fn test_write_after_growing_truncate_stays_in_blocks() {
    let fs = new_test_fs();
    let ino = new_file(&fs, "sparse");
    fs.truncate(ino, 10_000).unwrap();
    fs.write(ino, 0, b"hello").unwrap();

    assert!(!fs.has_inline_data(ino).unwrap());
    assert_eq!(fs.getattr(ino).unwrap().file_size, 10_000);
    let content = fs.read(ino, 0, 10_000).unwrap();
    assert_eq!(content.len(), 10_000);
    assert_eq!(&content[..5], b"hello");
    assert!(content[5..].iter().all(|b| *b == 0));
    assert!(fs.read(ino, 4096, 100).unwrap().iter().all(|b| *b == 0));
}

#[test]
fn test_inline_read_far_past_the_content() {
    let fs = new_test_fs();
    let ino = new_file(&fs, "small");
    fs.write(ino, 0, b"tiny").unwrap();
    assert!(fs.has_inline_data(ino).unwrap());

    assert!(fs.read(ino, 4096, 100).unwrap().is_empty());
    assert!(fs.read(ino, 8192, 1).unwrap().is_empty());
    assert_eq!(fs.read(ino, 2, 5000).unwrap(), b"ny");
}

#[test]
fn test_short_copy_over_the_whole_file_is_dropped() {
    let fs = new_test_fs();
    let ino = new_file(&fs, "short");
    fs.write(ino, 0, b"abc").unwrap();
    let inode = fs.iget(ino).unwrap();

    // overwriting everything reads nothing, so a short copy can't be kept
    let write = match fs.try_to_write_inline_data(&inode, 0, 10).unwrap() {
        WriteBegin::Inline(write) => write,
        WriteBegin::Converted => panic!("ten bytes should stay inline"),
    };
    assert!(!write.page.is_uptodate());
    assert_eq!(fs.write_inline_data_end(&inode, write, 4).unwrap(), 0);
    assert_eq!(fs.read(ino, 0, 100).unwrap(), b"abc");

    // a partial overwrite starts from the current content
    let mut write = match fs.try_to_write_inline_data(&inode, 1, 10).unwrap() {
        WriteBegin::Inline(write) => write,
        WriteBegin::Converted => panic!("ten bytes should stay inline"),
    };
    assert!(write.page.is_uptodate());
    write.page.data_mut()[1..3].copy_from_slice(b"XY");
    assert_eq!(fs.write_inline_data_end(&inode, write, 2).unwrap(), 2);
    assert_eq!(fs.read(ino, 0, 100).unwrap(), b"aXY");
}

#[test]
fn test_directory_lists_in_insertion_order() {
    let fs = new_test_fs();
    let dir = fs.mkdir(ROOT_INODE, "d", 0o755).unwrap();
    assert!(dir.has_inline_data());
    assert_eq!(dir.hard_links, 2);
    assert_eq!(fs.getattr(ROOT_INODE).unwrap().hard_links, 3);

    let order = ["zeta", "alpha", "mid", "beta"];
    let mut inodes = Vec::new();
    for name in order {
        inodes.push(fs.create(dir.inode_number, name, 0o644).unwrap().inode_number);
    }
    let mut cursor = DirCursor::default();
    let listed = fs.readdir(dir.inode_number, &mut cursor, usize::MAX).unwrap();
    assert_eq!(listed[0].name, ".");
    assert_eq!(listed[0].ino, dir.inode_number);
    assert_eq!(listed[1].name, "..");
    assert_eq!(listed[1].ino, ROOT_INODE);
    for (entry, (name, ino)) in listed[2..].iter().zip(order.iter().zip(&inodes)) {
        assert_eq!(entry.name, *name);
        assert_eq!(entry.ino, *ino);
    }
    assert_eq!(listed.len(), 2 + order.len());
    assert_eq!(fs.lookup(dir.inode_number, "mid").unwrap().inode_number, inodes[2]);
    assert_eq!(fs.create(dir.inode_number, "mid", 0o644).unwrap_err(), libc::EEXIST);
}

#[test]
fn test_deleted_slot_is_reused_without_conversion() {
    let fs = new_test_fs();
    let dir = fs.mkdir(ROOT_INODE, "reuse", 0o755).unwrap().inode_number;
    for name in ["aaaa", "bbbb", "cccc"] {
        fs.create(dir, name, 0o644).unwrap();
    }
    let capacity = fs.inline_size(dir).unwrap();
    fs.unlink(dir, "bbbb").unwrap();
    assert_eq!(fs.lookup(dir, "bbbb").unwrap_err(), libc::ENOENT);
    fs.create(dir, "dddd", 0o644).unwrap();
    assert!(fs.has_inline_data(dir).unwrap());
    assert_eq!(fs.inline_size(dir).unwrap(), capacity);
    assert_eq!(names(&fs, dir), [".", "..", "aaaa", "dddd", "cccc"]);
}

#[test]
fn test_directory_converts_and_cursor_survives() {
    let fs = new_test_fs();
    let dir = fs.mkdir(ROOT_INODE, "grows", 0o755).unwrap().inode_number;
    let all: Vec<String> = (0..30).map(|i| format!("f{i:02}")).collect();
    for name in &all[..10] {
        fs.create(dir, name, 0o644).unwrap();
    }
    let mut cursor = DirCursor::default();
    let first = fs.readdir(dir, &mut cursor, 6).unwrap();
    let first: Vec<_> = first.into_iter().map(|e| e.name).collect();
    assert_eq!(first, [".", "..", "f00", "f01", "f02", "f03"]);

    for name in &all[10..] {
        fs.create(dir, name, 0o644).unwrap();
    }
    assert!(!fs.has_inline_data(dir).unwrap());
    assert_eq!(fs.getattr(dir).unwrap().file_size, 512);

    let rest: Vec<_> = fs
        .readdir(dir, &mut cursor, usize::MAX)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(rest, all[4..]);

    let mut expected = vec![".".to_string(), "..".to_string()];
    expected.extend(all.iter().cloned());
    assert_eq!(names(&fs, dir), expected);
    for name in &all {
        fs.lookup(dir, name).unwrap();
    }
    assert_eq!(fs.lookup(dir, "..").unwrap().inode_number, ROOT_INODE);
}

#[test]
fn test_rmdir_and_unlink() {
    let fs = new_test_fs();
    let free_inodes = fs.superblock().free_inodes;
    let dir = fs.mkdir(ROOT_INODE, "gone", 0o755).unwrap().inode_number;
    let file = fs.create(dir, "inside", 0o644).unwrap().inode_number;
    fs.write(file, 0, &pattern(500, 1)).unwrap();

    assert_eq!(fs.rmdir(ROOT_INODE, "gone").unwrap_err(), libc::ENOTEMPTY);
    assert_eq!(fs.unlink(ROOT_INODE, "gone").unwrap_err(), libc::EISDIR);
    assert_eq!(fs.rmdir(dir, "inside").unwrap_err(), libc::ENOTDIR);

    let free_blocks = fs.superblock().free_blocks_count;
    fs.unlink(dir, "inside").unwrap();
    assert_eq!(fs.superblock().free_blocks_count, free_blocks + 1);
    assert_eq!(fs.getattr(file).unwrap_err(), libc::ENOENT);

    fs.rmdir(ROOT_INODE, "gone").unwrap();
    assert_eq!(fs.lookup(ROOT_INODE, "gone").unwrap_err(), libc::ENOENT);
    assert_eq!(fs.getattr(ROOT_INODE).unwrap().hard_links, 2);
    assert_eq!(fs.superblock().free_inodes, free_inodes);
    assert_eq!(names(&fs, ROOT_INODE), [".", ".."]);
}

#[test]
fn test_inline_extent_reports() {
    let fs = new_test_fs();
    let ino = new_file(&fs, "mapped");
    fs.write(ino, 0, &pattern(70, 0)).unwrap();

    let mapping = fs.iomap(ino).unwrap();
    assert_eq!(mapping.addr, fs.inode_seek_position(ino));
    assert_eq!(mapping.length, 70);

    let extents = fs.fiemap(ino, 10, 1000).unwrap();
    assert_eq!(extents.len(), 1);
    assert_eq!(extents[0].logical, 10);
    assert_eq!(extents[0].physical, mapping.addr + 10);
    assert_eq!(extents[0].length, 60);
    assert_eq!(
        extents[0].flags,
        FIEMAP_EXTENT_DATA_INLINE | FIEMAP_EXTENT_NOT_ALIGNED | FIEMAP_EXTENT_LAST
    );
    assert!(fs.fiemap(ino, 70, 10).unwrap().is_empty());
}

#[test]
fn test_names_are_checked() {
    let fs = new_test_fs();
    assert_eq!(fs.create(ROOT_INODE, "", 0o644).unwrap_err(), libc::EINVAL);
    assert_eq!(fs.create(ROOT_INODE, "a/b", 0o644).unwrap_err(), libc::EINVAL);
    let long = "n".repeat(300);
    assert_eq!(fs.create(ROOT_INODE, &long, 0o644).unwrap_err(), libc::ENAMETOOLONG);
    let file = new_file(&fs, "plain");
    assert_eq!(fs.create(file, "child", 0o644).unwrap_err(), libc::ENOTDIR);
    assert_eq!(fs.write(ROOT_INODE, 0, b"x").unwrap_err(), libc::EISDIR);
}

#[test]
fn test_content_survives_reopen() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("inline.img");
    mkfs(&image_path, &MkfsOptions::default()).unwrap();

    let content = pattern(90, 11);
    let (file, sub) = {
        let fs = MyFS::open(&image_path).unwrap();
        let file = new_file(&fs, "kept");
        fs.write(file, 0, &content).unwrap();
        let sub = fs.mkdir(ROOT_INODE, "sub", 0o755).unwrap().inode_number;
        fs.create(sub, "leaf", 0o644).unwrap();
        fs.sync().unwrap();
        (file, sub)
    };

    let fs = MyFS::open(&image_path).unwrap();
    assert!(fs.has_inline_data(file).unwrap());
    assert_eq!(fs.inline_size(file).unwrap(), 90);
    assert_eq!(fs.read(file, 0, 100).unwrap(), content);
    assert!(fs.has_inline_data(sub).unwrap());
    assert_eq!(names(&fs, sub), [".", "..", "leaf"]);
    assert_eq!(names(&fs, ROOT_INODE), [".", "..", "kept", "sub"]);
}

#[test]
fn test_interrupted_truncate_is_finished_on_open() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("orphan.img");
    mkfs(&image_path, &MkfsOptions::default()).unwrap();

    let file = {
        let fs = MyFS::open(&image_path).unwrap();
        let file = new_file(&fs, "half");
        fs.write(file, 0, &pattern(80, 0)).unwrap();
        fs.transaction(|handle| {
            fs.orphan_add(handle, file);
            Ok(())
        })
        .unwrap();
        fs.sync().unwrap();
        file
    };

    let fs = MyFS::open(&image_path).unwrap();
    assert!(fs.superblock().orphans.is_empty());
    assert_eq!(fs.read(file, 0, 100).unwrap(), pattern(80, 0));
}

#[test]
fn test_concurrent_writers() {
    let fs = new_test_fs();
    let files: Vec<u64> = (0..4).map(|i| new_file(&fs, &format!("w{i}"))).collect();
    std::thread::scope(|s| {
        for (i, ino) in files.iter().enumerate() {
            let fs = &fs;
            s.spawn(move || {
                // the third file ends up in a block
                let len = if i == 2 { 600 } else { 200 };
                for (n, chunk) in pattern(len, i as u8).chunks(25).enumerate() {
                    fs.write(*ino, (n * 25) as u64, chunk).unwrap();
                    fs.read(*ino, 0, n * 25 + 25).unwrap();
                }
            });
        }
    });
    for (i, ino) in files.iter().enumerate() {
        let len = if i == 2 { 600 } else { 200 };
        assert_eq!(fs.read(*ino, 0, 1000).unwrap(), pattern(len, i as u8));
        assert_eq!(fs.has_inline_data(*ino).unwrap(), i != 2);
    }
}
