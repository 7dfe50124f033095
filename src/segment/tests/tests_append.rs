//! Active-segment append, offset, and size-tracking tests.

#[cfg(test)]
mod tests {
    use crate::record::{encoded_len, LEN_PREFIX_BYTES};
    use crate::segment::{read_value_at, segment_path, ActiveSegment};
    use tempfile::TempDir;

    #[test]
    fn append_returns_offset_of_value_length_field() {
        let tmp = TempDir::new().unwrap();
        let mut seg = ActiveSegment::create(tmp.path(), 1).unwrap();

        let offset = seg.append(b"name", b"gopher").unwrap();
        // Record starts at 0: 4 bytes key length + 4 bytes key.
        assert_eq!(offset, (LEN_PREFIX_BYTES + 4) as u64);

        assert_eq!(read_value_at(&seg.path, offset).unwrap(), b"gopher");
    }

    #[test]
    fn size_tracks_bytes_written() {
        let tmp = TempDir::new().unwrap();
        let mut seg = ActiveSegment::create(tmp.path(), 1).unwrap();
        assert_eq!(seg.size, 0);

        seg.append(b"a", b"1").unwrap();
        assert_eq!(seg.size, encoded_len(b"a", b"1"));

        seg.append(b"bb", b"22").unwrap();
        assert_eq!(seg.size, encoded_len(b"a", b"1") + encoded_len(b"bb", b"22"));

        seg.sync().unwrap();
        let on_disk = std::fs::metadata(&seg.path).unwrap().len();
        assert_eq!(seg.size, on_disk);
    }

    #[test]
    fn index_holds_latest_offset_per_key() {
        let tmp = TempDir::new().unwrap();
        let mut seg = ActiveSegment::create(tmp.path(), 1).unwrap();

        let first = seg.append(b"k", b"old").unwrap();
        let second = seg.append(b"k", b"new").unwrap();
        assert!(second > first);

        assert_eq!(seg.index[&b"k".to_vec()], second);
        assert_eq!(read_value_at(&seg.path, second).unwrap(), b"new");
        // The superseded record is still readable at its own offset.
        assert_eq!(read_value_at(&seg.path, first).unwrap(), b"old");
    }

    #[test]
    fn binary_keys_and_values() {
        let tmp = TempDir::new().unwrap();
        let mut seg = ActiveSegment::create(tmp.path(), 1).unwrap();

        let key = vec![0u8, 1, 2, 0, 255];
        let value = vec![0u8; 1024];
        let offset = seg.append(&key, &value).unwrap();

        assert_eq!(read_value_at(&seg.path, offset).unwrap(), value);
    }

    #[test]
    fn empty_value_round_trips() {
        let tmp = TempDir::new().unwrap();
        let mut seg = ActiveSegment::create(tmp.path(), 1).unwrap();

        let offset = seg.append(b"empty", b"").unwrap();
        assert_eq!(read_value_at(&seg.path, offset).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn segment_file_is_named_by_identifier() {
        let tmp = TempDir::new().unwrap();
        let seg = ActiveSegment::create(tmp.path(), 7).unwrap();

        assert_eq!(seg.path, segment_path(tmp.path(), 7));
        assert!(seg.path.ends_with("7.dat"));
        assert!(seg.path.exists());
    }

    #[test]
    fn seal_freezes_index_and_keeps_path() {
        let tmp = TempDir::new().unwrap();
        let mut seg = ActiveSegment::create(tmp.path(), 3).unwrap();
        seg.append(b"k", b"v").unwrap();

        let path = seg.path.clone();
        let index = seg.index.clone();
        let sealed = seg.seal();

        assert_eq!(sealed.id, 3);
        assert_eq!(sealed.path, path);
        assert_eq!(sealed.index, index);
    }
}
