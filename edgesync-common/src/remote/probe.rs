//! Single-command probes of remote state.

use super::{CommandChannel, shell};
use crate::digest::DigestAlgorithm;
use crate::errors::ChannelError;
use tracing::debug;

/// Size of `path` on the device, or `None` if it does not exist or the
/// output of `stat` does not parse.
pub async fn remote_size<C: CommandChannel>(
    channel: &mut C,
    path: &str,
) -> Result<Option<u64>, ChannelError> {
    let result = channel.execute(&shell::stat_size(path)).await?;
    if !result.success() {
        debug!(path, exit = result.exit_code, "remote stat failed");
        return Ok(None);
    }
    Ok(result.stdout.trim().parse::<u64>().ok())
}

/// Digest of `path` on the device, or `None` if the tool failed or printed
/// something that is not a digest.
pub async fn remote_digest<C: CommandChannel>(
    channel: &mut C,
    algorithm: DigestAlgorithm,
    path: &str,
) -> Result<Option<String>, ChannelError> {
    let result = channel.execute(&shell::digest(algorithm, path)).await?;
    if !result.success() {
        debug!(path, exit = result.exit_code, "remote {} failed", algorithm.remote_tool());
        return Ok(None);
    }
    Ok(algorithm.parse_remote_output(&result.stdout))
}

pub async fn remote_file_exists<C: CommandChannel>(
    channel: &mut C,
    path: &str,
) -> Result<bool, ChannelError> {
    Ok(channel.execute(&shell::file_exists(path)).await?.success())
}

pub async fn remote_dir_exists<C: CommandChannel>(
    channel: &mut C,
    path: &str,
) -> Result<bool, ChannelError> {
    Ok(channel.execute(&shell::dir_exists(path)).await?.success())
}

/// `mkdir -p` on the device. Returns stderr on failure.
pub async fn ensure_remote_dir<C: CommandChannel>(
    channel: &mut C,
    dir: &str,
) -> Result<Result<(), String>, ChannelError> {
    let result = channel.execute(&shell::mkdir_p(dir)).await?;
    if result.success() {
        Ok(Ok(()))
    } else {
        Ok(Err(result.stderr.trim().to_string()))
    }
}

/// First path named `name` under any of `roots`.
pub async fn locate<C: CommandChannel>(
    channel: &mut C,
    roots: &[String],
    name: &str,
) -> Result<Option<String>, ChannelError> {
    let result = channel.execute(&shell::locate(roots, name)).await?;
    let found = result.stdout.lines().next().map(str::trim).unwrap_or("");
    if found.is_empty() {
        Ok(None)
    } else {
        Ok(Some(found.to_string()))
    }
}

/// Free space in MiB on the filesystem holding `path`.
pub async fn free_space_mb<C: CommandChannel>(
    channel: &mut C,
    path: &str,
) -> Result<Option<u64>, ChannelError> {
    let result = channel.execute(&shell::free_kb(path)).await?;
    if !result.success() {
        return Ok(None);
    }
    Ok(result.stdout.trim().parse::<u64>().ok().map(|kb| kb / 1024))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;
    use crate::remote::CommandResult;

    #[tokio::test]
    async fn test_remote_size_of_missing_file_is_none() {
        let mut device = MockDevice::new();
        assert_eq!(remote_size(&mut device, "/d/missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remote_size_parses_stat_output() {
        let mut device = MockDevice::new();
        device.put_file("/d/a.bin", vec![0u8; 42]);
        assert_eq!(remote_size(&mut device, "/d/a.bin").await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_remote_size_unparsable_output_is_none() {
        let mut device = MockDevice::new();
        device.respond_to("stat -c %s /d/odd", CommandResult::ok("Permission denied?\n"));
        assert_eq!(remote_size(&mut device, "/d/odd").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remote_digest_round_trip() {
        let mut device = MockDevice::new();
        device.put_file("/d/config.json", b"{}".to_vec());
        let digest = remote_digest(&mut device, DigestAlgorithm::Md5, "/d/config.json")
            .await
            .unwrap();
        assert_eq!(
            digest,
            Some(crate::digest::digest_bytes(DigestAlgorithm::Md5, b"{}"))
        );
        assert_eq!(
            remote_digest(&mut device, DigestAlgorithm::Md5, "/d/none")
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_locate_takes_first_line() {
        let mut device = MockDevice::new();
        let roots = vec!["/opt".to_string()];
        device.respond_to(
            &shell::locate(&roots, "libQnnCpu.so"),
            CommandResult::ok("/opt/qcom/lib/libQnnCpu.so\n/opt/other/libQnnCpu.so\n"),
        );
        assert_eq!(
            locate(&mut device, &roots, "libQnnCpu.so").await.unwrap(),
            Some("/opt/qcom/lib/libQnnCpu.so".to_string())
        );
        assert_eq!(locate(&mut device, &roots, "nothing.so").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ensure_remote_dir_and_exists() {
        let mut device = MockDevice::new();
        assert!(!remote_dir_exists(&mut device, "/d/sub").await.unwrap());
        ensure_remote_dir(&mut device, "/d/sub").await.unwrap().unwrap();
        assert!(remote_dir_exists(&mut device, "/d/sub").await.unwrap());
        assert!(remote_dir_exists(&mut device, "/d").await.unwrap());
        assert!(!remote_file_exists(&mut device, "/d/sub").await.unwrap());
    }
}
