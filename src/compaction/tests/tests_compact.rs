//! Compaction semantics: space reclamation, tombstone dropping, fidelity.

#[cfg(test)]
mod tests {
    use crate::compaction::BACKUP_DIR;
    use crate::engine::tests::helpers::*;
    use crate::engine::EngineError;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Read every `.dat` file in the data directory into one byte blob.
    fn all_segment_bytes(dir: &std::path::Path) -> Vec<u8> {
        let mut blob = Vec::new();
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("dat") {
                blob.extend_from_slice(&std::fs::read(&path).unwrap());
            }
        }
        blob
    }

    #[test]
    fn compaction_shrinks_segment_count_and_keeps_values() {
        let tmp = TempDir::new().unwrap();
        let engine = open_with(&tmp, tiny_segment_config(256));

        for i in 0u32..50 {
            engine
                .put(format!("key_{i:02}").as_bytes(), format!("value_{i:02}").as_bytes())
                .unwrap();
        }
        for i in 0u32..50 {
            engine
                .put(format!("key_{i:02}").as_bytes(), format!("update_{i:02}").as_bytes())
                .unwrap();
        }
        for i in 0u32..25 {
            engine
                .put(format!("key_{i:02}").as_bytes(), format!("new_{i:02}").as_bytes())
                .unwrap();
        }

        let files_before = dat_file_count(tmp.path());
        let summary = engine.compact().unwrap();
        let files_after = dat_file_count(tmp.path());

        assert!(
            files_after < files_before,
            "expected fewer files: {files_before} -> {files_after}"
        );
        assert!(summary.output_segments < summary.input_segments);

        for i in 0u32..25 {
            assert_eq!(
                engine.get(format!("key_{i:02}").as_bytes()).unwrap(),
                Some(format!("new_{i:02}").into_bytes()),
                "key_{i:02}"
            );
        }
        for i in 25u32..50 {
            assert_eq!(
                engine.get(format!("key_{i:02}").as_bytes()).unwrap(),
                Some(format!("update_{i:02}").into_bytes()),
                "key_{i:02}"
            );
        }
    }

    #[test]
    fn fully_deleted_keys_absent_from_compacted_files() {
        let tmp = TempDir::new().unwrap();
        let engine = open_with(&tmp, tiny_segment_config(128));

        for i in 0u32..20 {
            engine
                .put(format!("victim_{i:02}").as_bytes(), b"payload")
                .unwrap();
        }
        for i in 0u32..20 {
            engine.delete(format!("victim_{i:02}").as_bytes()).unwrap();
        }
        engine.put(b"survivor", b"alive").unwrap();

        // Push every tombstone out of the active segment so compaction sees
        // them all: the oversized pad fills the active segment past the
        // limit, and the append after it forces the rotation.
        engine.put(b"pad1", &[0u8; 200]).unwrap();
        engine.put(b"pad2", b"x").unwrap();

        engine.compact().unwrap();

        let blob = all_segment_bytes(tmp.path());
        for i in 0u32..20 {
            let key = format!("victim_{i:02}");
            assert!(
                !blob
                    .windows(key.len())
                    .any(|window| window == key.as_bytes()),
                "{key} still present in compacted data"
            );
            assert_eq!(engine.get(key.as_bytes()).unwrap(), None);
        }
        assert_eq!(engine.get(b"survivor").unwrap(), Some(b"alive".to_vec()));
    }

    #[test]
    fn compaction_preserves_get_for_every_key() {
        let tmp = TempDir::new().unwrap();
        let engine = open_with(&tmp, tiny_segment_config(200));

        let mut expected: HashMap<Vec<u8>, Option<Vec<u8>>> = HashMap::new();
        for i in 0u32..60 {
            let key = format!("k_{i:02}").into_bytes();
            let value = format!("v_{i:02}").into_bytes();
            engine.put(&key, &value).unwrap();
            expected.insert(key, Some(value));
        }
        for i in (0u32..60).step_by(3) {
            let key = format!("k_{i:02}").into_bytes();
            engine.delete(&key).unwrap();
            expected.insert(key, None);
        }

        engine.compact().unwrap();

        for (key, want) in &expected {
            assert_eq!(&engine.get(key).unwrap(), want);
        }
    }

    #[test]
    fn nothing_to_compact_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let engine = open_default(&tmp);
        engine.put(b"k", b"v").unwrap();

        let summary = engine.compact().unwrap();
        assert_eq!(summary.input_segments, 0);
        assert_eq!(summary.output_segments, 0);
        assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn leftover_compaction_dir_reports_in_progress() {
        let tmp = TempDir::new().unwrap();
        let engine = open_with(&tmp, tiny_segment_config(1));
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();

        std::fs::create_dir(tmp.path().join("compaction")).unwrap();

        assert!(matches!(
            engine.compact(),
            Err(EngineError::CompactionInProgress)
        ));
    }

    #[test]
    fn retired_segments_land_in_backup_directory() {
        let tmp = TempDir::new().unwrap();
        let engine = open_with(&tmp, tiny_segment_config(1));
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.put(b"c", b"3").unwrap();

        let sealed_before = engine.stats().unwrap().sealed_segments;
        assert!(sealed_before >= 2);

        engine.compact().unwrap();

        let backup_root = tmp.path().join(BACKUP_DIR);
        let stamped: Vec<_> = std::fs::read_dir(&backup_root)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(stamped.len(), 1);

        let retired = std::fs::read_dir(&stamped[0]).unwrap().count();
        assert_eq!(retired, sealed_before);

        // The transient working directory is gone.
        assert!(!tmp.path().join("compaction").exists());
    }

    #[test]
    fn compaction_survives_close_and_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = open_with(&tmp, tiny_segment_config(128));
            for i in 0u32..30 {
                engine
                    .put(format!("k_{i:02}").as_bytes(), format!("v_{i:02}").as_bytes())
                    .unwrap();
            }
            for i in 0u32..30 {
                engine
                    .put(format!("k_{i:02}").as_bytes(), format!("w_{i:02}").as_bytes())
                    .unwrap();
            }
            engine.delete(b"k_00").unwrap();
            engine.put(b"pad", &[0u8; 150]).unwrap();
            engine.compact().unwrap();
            engine.close().unwrap();
        }

        let engine = open_with(&tmp, tiny_segment_config(128));
        assert_eq!(engine.get(b"k_00").unwrap(), None);
        for i in 1u32..30 {
            assert_eq!(
                engine.get(format!("k_{i:02}").as_bytes()).unwrap(),
                Some(format!("w_{i:02}").into_bytes())
            );
        }
    }

    #[test]
    fn repeated_compaction_is_stable() {
        let tmp = TempDir::new().unwrap();
        let engine = open_with(&tmp, tiny_segment_config(128));

        for i in 0u32..20 {
            engine
                .put(format!("k_{i:02}").as_bytes(), format!("v_{i:02}").as_bytes())
                .unwrap();
        }

        engine.compact().unwrap();
        engine.compact().unwrap();

        for i in 0u32..20 {
            assert_eq!(
                engine.get(format!("k_{i:02}").as_bytes()).unwrap(),
                Some(format!("v_{i:02}").into_bytes())
            );
        }
    }
}
