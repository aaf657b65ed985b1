//! Small helpers shared by resources.

/// Returns the sha256 digest of the file at the given path *if it exists*.
/// If the file does _not_ exist it returns `Ok(None)`.
///
/// Resources store the digest of their artifacts so a changed artifact shows
/// up as a changed definition.
pub fn sha256_digest(path: impl AsRef<std::path::Path>) -> anyhow::Result<Option<String>> {
    log::trace!("determining sha256 of {}", path.as_ref().display());
    if !path.as_ref().exists() {
        return Ok(None);
    }

    let mut context = ring::digest::Context::new(&ring::digest::SHA256);
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    let mut buffer = [0; 4096];
    loop {
        let count = std::io::Read::read(&mut reader, &mut buffer)?;
        if count == 0 {
            break;
        }
        context.update(&buffer[..count]);
    }
    Ok(Some(data_encoding::HEXUPPER.encode(context.finish().as_ref())))
}

/// Lowercase hex suffix derived from `seed`, stable across runs.
///
/// Used to keep globally unique names (bucket names) unique per account.
pub fn short_hash(seed: &str, len: usize) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, seed.as_bytes());
    let mut hex = data_encoding::HEXLOWER.encode(digest.as_ref());
    hex.truncate(len);
    hex
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn digest_of_missing_file_is_none() {
        assert!(sha256_digest("/definitely/not/here.zip").unwrap().is_none());
    }

    #[test]
    fn digest_of_file() {
        let dir = std::path::Path::new(std::env!("CARGO_WORKSPACE_DIR")).join("test_output/digest");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("artifact.txt");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            Some("BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD".to_owned()),
            sha256_digest(&path).unwrap()
        );
    }

    #[test]
    fn short_hash_is_stable() {
        assert_eq!(short_hash("123456789012", 8), short_hash("123456789012", 8));
        assert_eq!(8, short_hash("123456789012", 8).len());
        assert_ne!(short_hash("a", 8), short_hash("b", 8));
    }
}
