use dualpack::archive::{self, EntryKind, NoopObserver, PackOptions, PackSession, UnpackOptions};
use dualpack::{
    ArchiveError, BinaryContainerWriter, ContainerKind, TextContainerWriter, BINARY_CONTAINER_FILE,
    TEXT_CONTAINER_FILE,
};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use tempfile::TempDir;

fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (rel, data) in files {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, data).unwrap();
    }
}

/// Every file under `root` keyed by its `/`-separated relative path.
fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(root).unwrap()
                    .components()
                    .map(|c| c.as_os_str().to_str().unwrap())
                    .collect::<Vec<_>>()
                    .join("/");
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    out
}

fn pack_default(src: &Path, out: &Path) -> archive::PackReport {
    archive::pack(src, out, &PackOptions::default(), &mut NoopObserver).unwrap()
}

const MIXED_TREE: &[(&str, &[u8])] = &[
    ("readme.md", b"# Title\n\nSome text.\n"),
    ("empty.txt", b""),
    ("src/main.rs", b"fn main() {\r\n    println!(\"hi\");\r\n}"),
    ("src/util/helpers.rs", "// üñí©ødé ✓\n".as_bytes()),
    ("assets/logo.png", &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00]),
    ("assets/raw/latin1.txt", &[b'c', b'a', b'f', 0xe9]),
    ("data/zeros.bin", &[0u8; 1024]),
];

#[test]
fn test_scenario_a_text_file_record() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_tree(src.path(), &[("a.txt", b"hello\n")]);

    let report = pack_default(src.path(), out.path());
    assert_eq!((report.text_files, report.binary_files), (1, 0));

    let text = fs::read_to_string(out.path().join(TEXT_CONTAINER_FILE)).unwrap();
    assert_eq!(text, "DPACKTXT\nFileCount: 1               \nRelativeFile: a.txt\nLength: 6\nhello\n");
}

#[test]
fn test_scenario_b_binary_file_record() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_tree(src.path(), &[("b.bin", &[0x00, 0x01, 0x02])]);

    let report = pack_default(src.path(), out.path());
    assert_eq!((report.text_files, report.binary_files), (0, 1));

    let bytes = fs::read(out.path().join(BINARY_CONTAINER_FILE)).unwrap();
    let mut expected = b"DPACKBIN".to_vec();
    expected.extend_from_slice(&1u32.to_le_bytes());
    expected.extend_from_slice(&5u32.to_le_bytes());
    expected.extend_from_slice(b"b.bin");
    expected.extend_from_slice(&3u64.to_le_bytes());
    expected.extend_from_slice(&[0x00, 0x01, 0x02]);
    assert_eq!(bytes, expected);
}

#[test]
fn test_scenario_c_empty_directory() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    let report = pack_default(src.path(), out.path());
    assert_eq!(report.total_files(), 0);
    assert_eq!(fs::read(out.path().join(BINARY_CONTAINER_FILE)).unwrap(), b"DPACKBIN\0\0\0\0");
    assert_eq!(
        fs::read_to_string(out.path().join(TEXT_CONTAINER_FILE)).unwrap(),
        "DPACKTXT\nFileCount: 0               \n"
    );
}

#[test]
fn test_scenario_d_bad_signature_writes_nothing() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write_tree(src.path(), MIXED_TREE);
    pack_default(src.path(), out.path());

    let bin_path = out.path().join(BINARY_CONTAINER_FILE);
    let mut bytes = fs::read(&bin_path).unwrap();
    bytes[..8].copy_from_slice(b"BADMAGIC");
    fs::write(&bin_path, bytes).unwrap();

    let target = dest.path().join("restored");
    let err = archive::unpack(out.path(), &target, &UnpackOptions::default(), &mut NoopObserver).unwrap_err();
    assert!(matches!(err, ArchiveError::Format { container: ContainerKind::Binary, .. }));
    assert!(!target.exists(), "no output may be written when a header is invalid");
}

#[test]
fn test_pack_unpack_roundtrip() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write_tree(src.path(), MIXED_TREE);

    let report = pack_default(src.path(), out.path());
    assert_eq!(report.total_files(), MIXED_TREE.len() as u64);
    assert!(report.skipped.is_empty());

    let unpacked = archive::unpack(out.path(), dest.path(), &UnpackOptions::default(), &mut NoopObserver).unwrap();
    assert_eq!(unpacked.total_files(), report.total_files());
    assert!(unpacked.missing.is_empty());
    assert_eq!(read_tree(dest.path()), read_tree(src.path()));
}

#[test]
fn test_classification_routes_files_to_expected_containers() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_tree(src.path(), MIXED_TREE);

    let mut events = Vec::new();
    archive::pack(src.path(), out.path(), &PackOptions::default(), &mut |p: &str, k: EntryKind| {
        events.push((p.to_string(), k))
    })
    .unwrap();

    let kinds: BTreeMap<_, _> = events.into_iter().collect();
    assert_eq!(kinds["readme.md"], EntryKind::Text);
    assert_eq!(kinds["empty.txt"], EntryKind::Text);
    assert_eq!(kinds["src/main.rs"], EntryKind::Text);
    assert_eq!(kinds["src/util/helpers.rs"], EntryKind::Text);
    assert_eq!(kinds["assets/logo.png"], EntryKind::Binary);
    assert_eq!(kinds["assets/raw/latin1.txt"], EntryKind::Binary);
    assert_eq!(kinds["data/zeros.bin"], EntryKind::Binary);
}

#[test]
fn test_containers_partition_the_file_set() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_tree(src.path(), MIXED_TREE);
    pack_default(src.path(), out.path());

    let listed = archive::list(out.path()).unwrap();
    let mut paths: Vec<_> = listed.iter().map(|e| e.relative_path.clone()).collect();
    paths.sort();
    let mut expected: Vec<_> = MIXED_TREE.iter().map(|(p, _)| p.to_string()).collect();
    expected.sort();
    assert_eq!(paths, expected, "each file must appear exactly once across both containers");
}

#[test]
fn test_declared_counts_match_consumed_entries() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_tree(src.path(), MIXED_TREE);
    let report = pack_default(src.path(), out.path());

    let listed = archive::list(out.path()).unwrap();
    let text = listed.iter().filter(|e| e.container == ContainerKind::Text).count();
    let binary = listed.iter().filter(|e| e.container == ContainerKind::Binary).count();
    assert_eq!(text as u32, report.text_files);
    assert_eq!(binary as u32, report.binary_files);

    let bin = fs::read(out.path().join(BINARY_CONTAINER_FILE)).unwrap();
    assert_eq!(u32::from_le_bytes(bin[8..12].try_into().unwrap()), report.binary_files);
    let txt = fs::read_to_string(out.path().join(TEXT_CONTAINER_FILE)).unwrap();
    let count_line = txt.lines().nth(1).unwrap();
    assert_eq!(count_line.len(), "FileCount: ".len() + 16);
    assert_eq!(count_line["FileCount: ".len()..].trim().parse::<u32>().unwrap(), report.text_files);
}

#[test]
fn test_encode_decode_encode_is_stable() {
    let src = TempDir::new().unwrap();
    let out1 = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let out2 = TempDir::new().unwrap();
    write_tree(src.path(), MIXED_TREE);

    pack_default(src.path(), out1.path());
    archive::unpack(out1.path(), dest.path(), &UnpackOptions::default(), &mut NoopObserver).unwrap();
    pack_default(dest.path(), out2.path());

    for name in [BINARY_CONTAINER_FILE, TEXT_CONTAINER_FILE] {
        assert_eq!(
            fs::read(out1.path().join(name)).unwrap(),
            fs::read(out2.path().join(name)).unwrap(),
            "{name} differs after a decode/encode cycle"
        );
    }
}

#[test]
fn test_output_dir_inside_root_is_not_packed() {
    let src = TempDir::new().unwrap();
    write_tree(src.path(), &[("a.txt", b"a"), ("packed/stale.txt", b"old")]);
    let out = src.path().join("packed");

    let report = pack_default(src.path(), &out);
    assert_eq!(report.total_files(), 1);
    let listed = archive::list(&out).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].relative_path, "a.txt");
}

#[test]
fn test_pack_options_filter_the_walk() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_tree(src.path(), &[("top.txt", b"t"), ("lab1/a.txt", b"a"), ("misc/b.txt", b"b"), (".git/HEAD", b"h")]);

    let opts = PackOptions {
        include_root_files: false,
        root_pattern:       Some("lab*".to_string()),
        ..PackOptions::default()
    };
    let report = archive::pack(src.path(), out.path(), &opts, &mut NoopObserver).unwrap();
    assert_eq!(report.total_files(), 1);
    assert_eq!(archive::list(out.path()).unwrap()[0].relative_path, "lab1/a.txt");
}

#[test]
fn test_invalid_root_pattern_is_rejected() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let opts = PackOptions { root_pattern: Some("[".to_string()), ..PackOptions::default() };
    let err = archive::pack(src.path(), out.path(), &opts, &mut NoopObserver).unwrap_err();
    assert!(matches!(err, ArchiveError::Pattern(_)));
}

#[test]
fn test_unreadable_file_is_skipped_not_fatal() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_tree(src.path(), &[("ok.txt", b"fine"), ("dir/inner", b"x")]);

    let mut skipped = Vec::new();
    struct Recorder<'a>(&'a mut Vec<String>);
    impl archive::PackObserver for Recorder<'_> {
        fn on_file_processed(&mut self, _: &str, _: EntryKind) {}
        fn on_file_skipped(&mut self, path: &Path, _: &str) {
            self.0.push(path.file_name().unwrap().to_string_lossy().into_owned());
        }
    }

    let root = src.path().canonicalize().unwrap();
    let mut observer = Recorder(&mut skipped);
    let mut session = PackSession::create(&root, out.path(), &mut observer).unwrap();
    session.add_file(&root.join("ok.txt")).unwrap();
    // A directory cannot be read as file content, neither as text nor as raw bytes.
    session.add_file(&root.join("dir")).unwrap();
    let report = session.finish().unwrap();

    assert_eq!(report.text_files, 1);
    assert_eq!(report.binary_files, 0);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(skipped, vec!["dir".to_string()]);
}

#[test]
fn test_unpack_overwrites_existing_files_by_default() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write_tree(src.path(), &[("a.txt", b"new")]);
    write_tree(dest.path(), &[("a.txt", b"old and longer")]);
    pack_default(src.path(), out.path());

    archive::unpack(out.path(), dest.path(), &UnpackOptions::default(), &mut NoopObserver).unwrap();
    assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"new");
}

#[test]
fn test_unpack_no_clobber_refuses_existing_files() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write_tree(src.path(), &[("a.txt", b"new")]);
    write_tree(dest.path(), &[("a.txt", b"old")]);
    pack_default(src.path(), out.path());

    let opts = UnpackOptions { overwrite: false, ..UnpackOptions::default() };
    let err = archive::unpack(out.path(), dest.path(), &opts, &mut NoopObserver).unwrap_err();
    assert!(matches!(err, ArchiveError::Path { container: ContainerKind::Text, entry: Some(0), .. }));
    assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"old");
}

#[test]
fn test_unpack_clean_removes_previous_output() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write_tree(src.path(), &[("a.txt", b"a")]);
    write_tree(dest.path(), &[("leftover.txt", b"x")]);
    pack_default(src.path(), out.path());

    let opts = UnpackOptions { clean_output: true, ..UnpackOptions::default() };
    archive::unpack(out.path(), dest.path(), &opts, &mut NoopObserver).unwrap();
    assert_eq!(read_tree(dest.path()).keys().collect::<Vec<_>>(), vec!["a.txt"]);
}

#[test]
fn test_missing_container_is_reported_not_fatal() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write_tree(src.path(), &[("a.txt", b"a"), ("b.bin", &[0, 1])]);
    pack_default(src.path(), out.path());
    fs::remove_file(out.path().join(TEXT_CONTAINER_FILE)).unwrap();

    let report = archive::unpack(out.path(), dest.path(), &UnpackOptions::default(), &mut NoopObserver).unwrap();
    assert_eq!(report.missing, vec![ContainerKind::Text]);
    assert_eq!(report.binary_files, 1);
    assert_eq!(read_tree(dest.path()).keys().collect::<Vec<_>>(), vec!["b.bin"]);
}

#[test]
fn test_no_containers_is_an_error() {
    let empty = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let err = archive::unpack(empty.path(), dest.path(), &UnpackOptions::default(), &mut NoopObserver).unwrap_err();
    assert!(matches!(err, ArchiveError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
}

fn hand_written_archive(dir: &Path, binary: &[(&str, &[u8])], text: &[(&str, &str)]) {
    let mut bw = BinaryContainerWriter::new(BufWriter::new(File::create(dir.join(BINARY_CONTAINER_FILE)).unwrap())).unwrap();
    for (p, d) in binary {
        bw.append_bytes(p, d).unwrap();
    }
    bw.finish().unwrap();
    let mut tw = TextContainerWriter::new(BufWriter::new(File::create(dir.join(TEXT_CONTAINER_FILE)).unwrap())).unwrap();
    for (p, c) in text {
        tw.append(p, c).unwrap();
    }
    tw.finish().unwrap();
}

#[test]
fn test_duplicate_path_across_containers_is_corrupt() {
    let out = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    hand_written_archive(out.path(), &[("same", b"\0")], &[("same", "text")]);

    let err = archive::unpack(out.path(), dest.path(), &UnpackOptions::default(), &mut NoopObserver).unwrap_err();
    assert!(matches!(err, ArchiveError::CorruptHeader { container: ContainerKind::Text, entry: Some(0), .. }));
}

#[test]
fn test_escaping_entry_path_is_refused() {
    let out = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    hand_written_archive(out.path(), &[], &[("../escape.txt", "nope")]);

    let target = dest.path().join("inner");
    let err = archive::unpack(out.path(), &target, &UnpackOptions::default(), &mut NoopObserver).unwrap_err();
    assert!(matches!(err, ArchiveError::UnsafePath { container: ContainerKind::Text, .. }));
    assert!(!dest.path().join("escape.txt").exists());
}

#[test]
fn test_truncated_binary_container_fails_with_entry_context() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write_tree(src.path(), &[("a.bin", &[0u8; 64]), ("b.bin", &[1u8; 64])]);
    pack_default(src.path(), out.path());

    let bin_path = out.path().join(BINARY_CONTAINER_FILE);
    let bytes = fs::read(&bin_path).unwrap();
    fs::write(&bin_path, &bytes[..bytes.len() - 10]).unwrap();

    let err = archive::unpack(out.path(), dest.path(), &UnpackOptions::default(), &mut NoopObserver).unwrap_err();
    assert!(matches!(err, ArchiveError::Truncated { container: ContainerKind::Binary, entry: Some(1), .. }));
    assert_eq!(err.entry(), Some(1));
}

#[test]
fn test_clean_pack_into_root_is_refused() {
    let src = TempDir::new().unwrap();
    write_tree(src.path(), &[("precious.txt", b"keep me")]);

    let opts = PackOptions { clean_output: true, ..PackOptions::default() };
    let err = archive::pack(src.path(), src.path(), &opts, &mut NoopObserver).unwrap_err();
    assert!(matches!(err, ArchiveError::OverlappingOutput { .. }));
    assert_eq!(fs::read(src.path().join("precious.txt")).unwrap(), b"keep me");
}

#[test]
fn test_clean_pack_into_ancestor_of_root_is_refused() {
    let parent = TempDir::new().unwrap();
    let root = parent.path().join("project");
    write_tree(&root, &[("a.txt", b"a")]);

    let opts = PackOptions { clean_output: true, ..PackOptions::default() };
    let err = archive::pack(&root, parent.path(), &opts, &mut NoopObserver).unwrap_err();
    assert!(matches!(err, ArchiveError::OverlappingOutput { .. }));
    assert!(root.join("a.txt").exists());
}

#[test]
fn test_clean_unpack_into_input_dir_is_refused() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_tree(src.path(), &[("a.txt", b"a")]);
    pack_default(src.path(), out.path());

    let opts = UnpackOptions { clean_output: true, ..UnpackOptions::default() };
    let err = archive::unpack(out.path(), out.path(), &opts, &mut NoopObserver).unwrap_err();
    assert!(matches!(err, ArchiveError::OverlappingOutput { .. }));
    assert!(out.path().join(BINARY_CONTAINER_FILE).exists());
    assert!(out.path().join(TEXT_CONTAINER_FILE).exists());
}

#[test]
fn test_repacking_into_root_skips_own_containers() {
    let src = TempDir::new().unwrap();
    write_tree(src.path(), &[("a.txt", b"a")]);

    pack_default(src.path(), src.path());
    let report = pack_default(src.path(), src.path());
    assert_eq!((report.text_files, report.binary_files), (1, 0));

    let listed = archive::list(src.path()).unwrap();
    let paths: Vec<_> = listed.iter().map(|e| e.relative_path.as_str()).collect();
    assert_eq!(paths, vec!["a.txt"]);
}

#[test]
fn test_non_utf8_binary_entry_path_is_corrupt() {
    let out = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();

    let mut bytes = b"DPACKBIN".to_vec();
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&2u32.to_le_bytes());
    bytes.extend_from_slice(&[0xff, 0xfe]);
    bytes.extend_from_slice(&1u64.to_le_bytes());
    bytes.push(0);
    fs::write(out.path().join(BINARY_CONTAINER_FILE), bytes).unwrap();

    let err = archive::unpack(out.path(), dest.path(), &UnpackOptions::default(), &mut NoopObserver).unwrap_err();
    assert!(matches!(err, ArchiveError::CorruptHeader { container: ContainerKind::Binary, entry: Some(0), .. }));
}

#[cfg(unix)]
#[test]
fn test_text_file_with_line_break_in_name_goes_to_binary_container() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    write_tree(src.path(), &[("odd\nname.txt", b"plain text\n"), ("normal.txt", b"x")]);

    let report = pack_default(src.path(), out.path());
    assert_eq!((report.text_files, report.binary_files), (1, 1));

    let listed = archive::list(out.path()).unwrap();
    let odd = listed.iter().find(|e| e.relative_path == "odd\nname.txt").unwrap();
    assert_eq!(odd.container, ContainerKind::Binary);

    archive::unpack(out.path(), dest.path(), &UnpackOptions::default(), &mut NoopObserver).unwrap();
    assert_eq!(fs::read(dest.path().join("odd\nname.txt")).unwrap(), b"plain text\n");
}
