use super::{byte_count_iec, expand_stdin, get_cdr};

pub async fn run(uri: &str) -> anyhow::Result<()> {
    let uri = expand_stdin(uri)?;
    let mut total_compressed = 0u64;
    let mut total_uncompressed = 0u64;
    let mut total_files = 0u64;
    for record in get_cdr(&uri).await? {
        if record.is_dir() {
            continue;
        }
        total_compressed += record.compressed_size_bytes;
        total_uncompressed += record.uncompressed_size_bytes;
        total_files += 1;
    }
    println!("zip file: {uri}");
    println!("files: {total_files}");
    println!("total bytes (compressed): {total_compressed}");
    println!("total bytes (uncompressed): {total_uncompressed}");
    println!("total bytes (compressed, human readable): {}", byte_count_iec(total_compressed));
    println!("total bytes (uncompressed, human readable): {}", byte_count_iec(total_uncompressed));
    Ok(())
}
