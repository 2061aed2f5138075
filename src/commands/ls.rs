use super::{expand_stdin, format_mode, get_cdr};

pub async fn run(uri: &str) -> anyhow::Result<()> {
    let uri = expand_stdin(uri)?;
    for record in get_cdr(&uri).await? {
        println!(
            "{}\t{:<12}\t{:<12}\t{}\t{}",
            format_mode(record.mode),
            record.compressed_size_bytes,
            record.uncompressed_size_bytes,
            record.modified.format("%d %b %y %H:%M %z"),
            record.file_name
        );
    }
    Ok(())
}
