//! Build a small archive and stream it into a file, block by block.
//!
//! Run with: cargo run --example stream_to_file

use chrono::Utc;
use std::fs::File;
use std::io::Write;
use ziptide::{stream_zip, ArchiveOptions, Bytes, Member, Method};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let members = vec![
        Member {
            name: "docs/".to_string(),
            modified_at: Utc::now(),
            mode: 0o755,
            method: Method::Store32,
            content: Box::new(std::iter::empty()),
        },
        Member {
            name: "docs/greeting.txt".to_string(),
            modified_at: Utc::now(),
            mode: 0o644,
            method: Method::Deflate32,
            content: Box::new(
                vec![
                    Bytes::from_static(b"hello "),
                    Bytes::from_static(b"streaming "),
                    Bytes::from_static(b"world\n"),
                ]
                .into_iter()
                .map(Ok),
            ),
        },
        Member {
            name: "data.bin".to_string(),
            modified_at: Utc::now(),
            mode: 0o644,
            method: Method::DeflateAuto {
                uncompressed_size: 1 << 20,
                level: 9,
            },
            content: Box::new(std::iter::once(Ok(Bytes::from(vec![0x5a; 1 << 20])))),
        },
    ];

    let mut output = File::create("output.zip")?;
    let mut written = 0u64;
    for block in stream_zip(members, ArchiveOptions::new()) {
        let block = block?;
        written += block.len() as u64;
        output.write_all(&block)?;
    }
    println!("wrote output.zip ({} bytes)", written);
    Ok(())
}
