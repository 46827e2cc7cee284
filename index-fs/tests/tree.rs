mod common;

use index_fs::{EntryKind, Error, INDEX_COUNT, Lba, Permissions, Volume};
use proptest::prelude::*;

use common::{format, mkdir, pattern, touch};

const BLOCK: usize = 512;

#[test]
fn write_then_read() {
    let (_, mut volume) = format(100);
    let root = volume.root();
    let file = touch(&mut volume, root, "hello", "txt");

    let entry = volume.entry(file).unwrap();
    assert_eq!("hello", entry.name);
    assert_eq!("txt", entry.extension);
    assert_eq!(root, entry.parent);
    assert_eq!(0, entry.size);
    assert!(entry.created <= entry.modified);

    let data = pattern(1300);
    assert_eq!(1300, volume.write_content(file, &data, 0).unwrap());
    assert_eq!(data, volume.read_content(file, 0, 1300).unwrap());
    assert_eq!(data[700..900], volume.read_content(file, 700, 200).unwrap()[..]);

    let entry = volume.entry(file).unwrap();
    assert_eq!(1300, entry.size);
    assert_eq!(3, entry.blocks.len());
    assert_eq!((100 - 51 - 4) * BLOCK as u64, volume.free_space());

    // 跨块覆盖写，大小不变
    volume.write_content(file, b"XYZ", 510).unwrap();
    let mut expected = data.clone();
    expected[510..513].copy_from_slice(b"XYZ");
    assert_eq!(expected, volume.read_content(file, 0, 1300).unwrap());
    assert_eq!(1300, volume.entry(file).unwrap().size);
    assert_eq!(3, volume.entry(file).unwrap().blocks.len());

    assert_eq!(0, volume.write_content(file, &[], 9000).unwrap());
    assert!(volume.check().unwrap().is_clean());
}

#[test]
fn holes_read_as_zero() {
    let (_, mut volume) = format(100);
    let root = volume.root();
    let file = touch(&mut volume, root, "sparse", "");

    volume.write_content(file, b"tail", 1000).unwrap();
    let entry = volume.entry(file).unwrap();
    assert_eq!(1004, entry.size);
    assert_eq!(2, entry.blocks.len());

    let content = volume.read_content(file, 0, 1004).unwrap();
    assert!(content[..1000].iter().all(|&byte| byte == 0));
    assert_eq!(b"tail", &content[1000..]);
}

#[test]
fn reads_stay_in_bounds() {
    let (_, mut volume) = format(100);
    let root = volume.root();
    let file = touch(&mut volume, root, "short", "");
    volume.write_content(file, b"0123456789", 0).unwrap();

    assert!(matches!(
        volume.read_content(file, 5, 6),
        Err(Error::Range {
            offset: 5,
            end: 11,
            size: 10
        })
    ));
    assert!(matches!(
        volume.read_content(file, u64::MAX, 2),
        Err(Error::Range { .. })
    ));
    assert!(volume.read_content(file, 10, 0).unwrap().is_empty());
    assert_eq!(b"56789".to_vec(), volume.read_content(file, 5, 5).unwrap());
}

#[test]
fn file_capacity() {
    let (_, mut volume) = format(200);
    let root = volume.root();
    let file = touch(&mut volume, root, "full", "bin");

    let max = INDEX_COUNT * BLOCK;
    let data = pattern(max);
    assert_eq!(max, volume.write_content(file, &data, 0).unwrap());
    let before = volume.entry(file).unwrap();
    assert_eq!(INDEX_COUNT, before.blocks.len());
    let free_space = volume.free_space();

    assert!(matches!(
        volume.write_content(file, b"!", max as u64),
        Err(Error::FileTooLarge(lba)) if lba == file
    ));
    assert!(matches!(
        volume.truncate(file, max as u64 + 1),
        Err(Error::FileTooLarge(_))
    ));

    let after = volume.entry(file).unwrap();
    assert_eq!(before.size, after.size);
    assert_eq!(before.blocks, after.blocks);
    assert_eq!(free_space, volume.free_space());
    assert_eq!(data, volume.read_content(file, 0, max as u64).unwrap());

    // 末块之内的覆盖写仍然可以
    volume.write_content(file, b"!", max as u64 - 1).unwrap();
    assert!(volume.check().unwrap().is_clean());
}

#[test]
fn insufficient_space_keeps_entry() {
    let (_, mut volume) = format(100);
    let root = volume.root();
    let file = touch(&mut volume, root, "greedy", "");
    assert_eq!(48, volume.free_blocks());

    assert!(matches!(
        volume.write_content(file, &pattern(49 * BLOCK), 0),
        Err(Error::InsufficientSpace {
            requested: 49,
            available: 48
        })
    ));

    let entry = volume.entry(file).unwrap();
    assert_eq!(0, entry.size);
    assert!(entry.blocks.is_empty());
    assert_eq!(48 * BLOCK as u64, volume.free_space());

    // 恰好用完所有空闲块
    volume.write_content(file, &pattern(48 * BLOCK), 0).unwrap();
    assert_eq!(0, volume.free_space());
    assert!(matches!(
        volume.create_entry(root, "late", "", EntryKind::File, Permissions::empty()),
        Err(Error::InsufficientSpace { .. })
    ));
    assert!(volume.check().unwrap().is_clean());
}

#[test]
fn directory_full() {
    let (_, mut volume) = format(200);
    let root = volume.root();
    let dir = mkdir(&mut volume, root, "crowded");

    for i in 0..INDEX_COUNT {
        touch(&mut volume, dir, &format!("f{i}"), "");
    }
    let entry = volume.entry(dir).unwrap();
    assert_eq!(INDEX_COUNT, entry.blocks.len());
    assert_eq!((INDEX_COUNT * BLOCK) as u64, entry.size);

    let free_space = volume.free_space();
    assert!(matches!(
        volume.create_entry(dir, "one-more", "", EntryKind::File, Permissions::empty()),
        Err(Error::DirectoryFull(lba)) if lba == dir
    ));
    assert_eq!(free_space, volume.free_space());

    // 腾出一个槽位后又能创建
    let victim = volume.resolve("/crowded/f10").unwrap();
    volume.delete_entry(victim).unwrap();
    touch(&mut volume, dir, "one-more", "");

    let names: Vec<_> = volume
        .read_dir(dir)
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    assert_eq!("f9", names[9]);
    assert_eq!("f11", names[10]);
    assert_eq!("one-more", names[INDEX_COUNT - 1]);

    let report = volume.check().unwrap();
    assert!(report.is_clean(), "{:?}", report.issues);
    assert_eq!(2, report.directories);
    assert_eq!(INDEX_COUNT as u64, report.files);
}

#[test]
fn names_are_checked() {
    let (_, mut volume) = format(100);
    let root = volume.root();
    touch(&mut volume, root, "report", "txt");
    let free_space = volume.free_space();

    // 扩展名不参与区分
    for (name, extension, kind) in [
        ("report", "txt", EntryKind::File),
        ("report", "md", EntryKind::File),
        ("report", "", EntryKind::Directory),
    ] {
        assert!(matches!(
            volume.create_entry(root, name, extension, kind, Permissions::empty()),
            Err(Error::DuplicateName(dup)) if dup == "report"
        ));
    }

    let long_name = "n".repeat(31);
    let long_extension = "e".repeat(17);
    for (name, extension, kind) in [
        ("", "", EntryKind::File),
        (".", "", EntryKind::Directory),
        ("..", "", EntryKind::Directory),
        ("a/b", "", EntryKind::File),
        (long_name.as_str(), "", EntryKind::File),
        ("ok", long_extension.as_str(), EntryKind::File),
        ("dir", "ext", EntryKind::Directory),
    ] {
        assert!(matches!(
            volume.create_entry(root, name, extension, kind, Permissions::empty()),
            Err(Error::InvalidName(_))
        ));
    }
    assert_eq!(free_space, volume.free_space());

    // 名字恰好 30 字节可以
    let exact = "n".repeat(30);
    let lba = touch(&mut volume, root, &exact, &"e".repeat(16));
    assert_eq!(exact, volume.entry(lba).unwrap().name);

    // 文件底下不能创建
    let file = volume.resolve("report").unwrap();
    assert!(matches!(
        volume.create_entry(file, "child", "", EntryKind::File, Permissions::empty()),
        Err(Error::NotADirectory(lba)) if lba == file
    ));
}

#[test]
fn recursive_delete() {
    let (_, mut volume) = format(200);
    let root = volume.root();
    let free_space = volume.free_space();

    let a = mkdir(&mut volume, root, "a");
    let b = mkdir(&mut volume, a, "b");
    let c = mkdir(&mut volume, b, "c");
    for (dir, name) in [(a, "x"), (b, "y"), (c, "z")] {
        let file = touch(&mut volume, dir, name, "dat");
        volume.write_content(file, &pattern(1200), 0).unwrap();
    }
    assert_eq!(4, volume.vcb().number_of_directories());
    assert_eq!(c, volume.resolve("/a/b/c").unwrap());

    volume.delete_entry(a).unwrap();

    assert_eq!(free_space, volume.free_space());
    assert_eq!(1, volume.vcb().number_of_directories());
    assert!(volume.read_dir(root).unwrap().is_empty());
    assert_eq!(0, volume.entry(root).unwrap().size);
    for lba in [a, b, c] {
        assert!(matches!(volume.entry(lba), Err(Error::NoEntry(gone)) if gone == lba));
    }
    assert!(matches!(volume.resolve("/a"), Err(Error::NotFound(_))));
    assert!(volume.check().unwrap().is_clean());

    // 释放的块按首次适应被重新用上
    assert_eq!(a, mkdir(&mut volume, root, "again"));
}

#[test]
fn delete_file() {
    let (disk, mut volume) = format(100);
    let root = volume.root();
    let keep = touch(&mut volume, root, "keep", "");
    let file = touch(&mut volume, root, "gone", "");
    volume.write_content(file, &pattern(2 * BLOCK), 0).unwrap();
    let free_space = volume.free_space();

    volume.delete_entry(file).unwrap();
    assert_eq!(free_space + 3 * BLOCK as u64, volume.free_space());
    assert!(matches!(
        volume.read_content(file, 0, 1),
        Err(Error::NoEntry(_))
    ));
    assert!(matches!(volume.delete_entry(file), Err(Error::NoEntry(_))));

    let children = volume.read_dir(root).unwrap();
    assert_eq!(1, children.len());
    assert_eq!(keep, children[0].location);
    assert_eq!(BLOCK as u64, volume.entry(root).unwrap().size);

    // 释放的目录项块已清零
    volume.sync().unwrap();
    let image = disk.snapshot();
    let start = usize::from(file) * BLOCK;
    assert!(image[start..start + BLOCK].iter().all(|&byte| byte == 0));

    assert!(matches!(
        volume.delete_entry(root),
        Err(Error::RootDirectory)
    ));
    assert!(matches!(
        volume.delete_entry(Lba::new(20)),
        Err(Error::NoEntry(_))
    ));
}

#[test]
fn resolve_paths() {
    let (_, mut volume) = format(100);
    let root = volume.root();
    let a = mkdir(&mut volume, root, "a");
    let b = mkdir(&mut volume, a, "b");
    let notes = touch(&mut volume, a, "notes", "txt");

    assert_eq!(root, volume.resolve("/").unwrap());
    assert_eq!(root, volume.resolve("").unwrap());
    assert_eq!(b, volume.resolve("/a/b").unwrap());
    assert_eq!(b, volume.resolve("a//b/").unwrap());
    assert_eq!(notes, volume.resolve("/a/./b/../notes").unwrap());
    assert_eq!(root, volume.resolve("/a/b/../..").unwrap());
    // 根目录的父目录是自己
    assert_eq!(root, volume.resolve("/../..").unwrap());

    assert_eq!(b, volume.resolve_path(root, &["a", "b"]).unwrap());
    assert_eq!(a, volume.resolve_path(b, &[".."]).unwrap());
    assert_eq!(a, volume.resolve_path::<&str>(a, &[]).unwrap());

    assert!(matches!(
        volume.resolve("/a/missing"),
        Err(Error::NotFound(name)) if name == "missing"
    ));
    // 扩展名不是名字的一部分
    assert!(matches!(
        volume.resolve("/a/notes.txt"),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        volume.resolve("/a/notes/deeper"),
        Err(Error::NotADirectory(lba)) if lba == notes
    ));
    assert!(matches!(
        volume.resolve_path::<&str>(Lba::new(90), &[]),
        Err(Error::NoEntry(_))
    ));

    volume.change_directory(a).unwrap();
    assert_eq!(notes, volume.resolve("notes").unwrap());
    assert_eq!(b, volume.resolve("./b").unwrap());
}

#[test]
fn truncate() {
    let (_, mut volume) = format(100);
    let root = volume.root();
    let file = touch(&mut volume, root, "log", "");
    let data = pattern(1500);
    volume.write_content(file, &data, 0).unwrap();
    let free_space = volume.free_space();

    volume.truncate(file, 600).unwrap();
    let entry = volume.entry(file).unwrap();
    assert_eq!(600, entry.size);
    assert_eq!(2, entry.blocks.len());
    assert_eq!(free_space + BLOCK as u64, volume.free_space());
    assert_eq!(data[..600], volume.read_content(file, 0, 600).unwrap()[..]);

    // 重新扩展后，截掉的部分读出为 0
    volume.truncate(file, 1100).unwrap();
    assert_eq!(3, volume.entry(file).unwrap().blocks.len());
    let content = volume.read_content(file, 0, 1100).unwrap();
    assert_eq!(data[..600], content[..600]);
    assert!(content[600..].iter().all(|&byte| byte == 0));

    volume.truncate(file, 0).unwrap();
    assert!(volume.entry(file).unwrap().blocks.is_empty());
    assert_eq!(free_space + 3 * BLOCK as u64, volume.free_space());
    assert!(volume.check().unwrap().is_clean());
}

#[test]
fn kinds_are_enforced() {
    let (_, mut volume) = format(100);
    let root = volume.root();
    let dir = mkdir(&mut volume, root, "dir");
    let file = touch(&mut volume, root, "file", "");

    assert!(matches!(
        volume.write_content(dir, b"data", 0),
        Err(Error::IsADirectory(lba)) if lba == dir
    ));
    assert!(matches!(
        volume.read_content(dir, 0, 0),
        Err(Error::IsADirectory(_))
    ));
    assert!(matches!(volume.truncate(dir, 0), Err(Error::IsADirectory(_))));
    assert!(matches!(
        volume.read_dir(file),
        Err(Error::NotADirectory(lba)) if lba == file
    ));

    // 空闲块与保留块上都没有目录项
    for raw in [0, 30, 80] {
        assert!(matches!(
            volume.entry(Lba::new(raw)),
            Err(Error::NoEntry(_))
        ));
    }
}

#[test]
fn permissions_survive_remount() {
    let (disk, mut volume) = format(100);
    let root = volume.root();
    let dir = mkdir(&mut volume, root, "shared");

    let permissions = Permissions::USER_READ | Permissions::GROUP_EXECUTE;
    volume.set_permissions(dir, permissions).unwrap();
    volume.unmount().unwrap();

    let mut volume = Volume::mount(disk).unwrap();
    let entry = volume.entry(dir).unwrap();
    assert_eq!(permissions, entry.permissions);
    assert!(entry.permissions.contains(Permissions::USER_READ));
    assert!(!entry.permissions.contains(Permissions::OTHER_READ));
    // 类型不受权限改动影响
    assert_eq!(EntryKind::Directory, entry.kind);
}

/// 按目录项的磁盘布局拼出一块
fn forged_entry(location: u64, parent: u64, kind: u16, index: &[u64]) -> Vec<u8> {
    let mut block = vec![0; BLOCK];
    block[..4].copy_from_slice(b"fake");
    block[46..54].copy_from_slice(&location.to_le_bytes());
    block[54..56].copy_from_slice(&kind.to_le_bytes());
    block[64..72].copy_from_slice(&(index.len() as u64 * BLOCK as u64).to_le_bytes());
    block[72..80].copy_from_slice(&parent.to_le_bytes());
    for (slot, raw) in index.iter().enumerate() {
        block[80 + slot * 8..88 + slot * 8].copy_from_slice(&raw.to_le_bytes());
    }
    block
}

#[test]
fn data_blocks_are_not_entries() {
    let (_, mut volume) = format(100);
    let root = volume.root();
    let victim = touch(&mut volume, root, "victim", "");
    let data = pattern(BLOCK);
    volume.write_content(victim, &data, 0).unwrap();
    let stolen = volume.entry(victim).unwrap().blocks[0];
    let forger = touch(&mut volume, root, "forger", "");

    // 第一块冒充根目录下的目录，第二块冒充它的子文件，索引指向别人的数据块
    let first = volume.free_blocks();
    let (fake_dir, fake_file) = (Lba::new(100 - first), Lba::new(101 - first));
    let mut content = forged_entry(fake_dir.get(), root.get(), 0x4000, &[fake_file.get()]);
    content.extend(forged_entry(
        fake_file.get(),
        fake_dir.get(),
        0,
        &[stolen.get()],
    ));
    volume.write_content(forger, &content, 0).unwrap();
    assert_eq!(
        vec![fake_dir, fake_file],
        volume.entry(forger).unwrap().blocks
    );
    let free_space = volume.free_space();

    for lba in [fake_dir, fake_file] {
        assert!(matches!(volume.delete_entry(lba), Err(Error::NoEntry(gone)) if gone == lba));
        assert!(matches!(volume.entry(lba), Err(Error::NoEntry(_))));
    }
    assert!(matches!(
        volume.change_directory(fake_dir),
        Err(Error::NoEntry(_))
    ));
    assert!(matches!(
        volume.create_entry(fake_dir, "x", "", EntryKind::File, Permissions::empty()),
        Err(Error::NoEntry(_))
    ));

    assert_eq!(free_space, volume.free_space());
    assert!(volume.is_allocated(stolen).unwrap());
    assert_eq!(data, volume.read_content(victim, 0, BLOCK as u64).unwrap());
    assert!(volume.check().unwrap().is_clean());
}

#[derive(Debug, Clone)]
enum Op {
    Create(u8),
    Write(u8, u16, u16),
    Truncate(u8, u16),
    Delete(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6).prop_map(Op::Create),
        (0u8..6, 0u16..3000, 1u16..2000).prop_map(|(i, offset, len)| Op::Write(i, offset, len)),
        (0u8..6, 0u16..4000).prop_map(|(i, len)| Op::Truncate(i, len)),
        (0u8..6).prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn blocks_have_one_owner(ops in prop::collection::vec(op(), 1..30)) {
        let (_, mut volume) = format(120);
        let root = volume.root();
        let dir = mkdir(&mut volume, root, "work");

        for op in ops {
            let name = |i: u8| format!("f{i}");
            let result = match op {
                Op::Create(i) => volume
                    .create_entry(dir, &name(i), "", EntryKind::File, Permissions::empty())
                    .map(drop),
                Op::Write(i, offset, len) => volume
                    .resolve_path(dir, &[name(i)])
                    .and_then(|lba| volume.write_content(lba, &pattern(len as usize), offset as u64))
                    .map(drop),
                Op::Truncate(i, len) => volume
                    .resolve_path(dir, &[name(i)])
                    .and_then(|lba| volume.truncate(lba, len as u64)),
                Op::Delete(i) => volume
                    .resolve_path(dir, &[name(i)])
                    .and_then(|lba| volume.delete_entry(lba)),
            };

            match result {
                Ok(())
                | Err(Error::NotFound(_))
                | Err(Error::DuplicateName(_))
                | Err(Error::InsufficientSpace { .. }) => {}
                Err(err) => return Err(TestCaseError::fail(err.to_string())),
            }

            let report = volume.check().unwrap();
            prop_assert!(report.is_clean(), "{:?}", report.issues);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_length_round_trips(len in 0..=INDEX_COUNT * BLOCK, offset in 0u64..BLOCK as u64) {
        let (_, mut volume) = format(200);
        let root = volume.root();
        let file = touch(&mut volume, root, "blob", "");

        let data = pattern(len);
        prop_assert_eq!(len, volume.write_content(file, &data, 0).unwrap());
        prop_assert_eq!(&data, &volume.read_content(file, 0, len as u64).unwrap());
        prop_assert_eq!(
            len.div_ceil(BLOCK),
            volume.entry(file).unwrap().blocks.len()
        );

        // 从任意偏移读出的尾部
        let offset = offset.min(len as u64);
        let tail = volume.read_content(file, offset, len as u64 - offset).unwrap();
        prop_assert_eq!(&data[offset as usize..], &tail[..]);
    }
}
