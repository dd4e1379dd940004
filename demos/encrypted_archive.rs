//! Stream a password-protected archive (WinZip AE-2, AES-256).
//!
//! Run with: cargo run --example encrypted_archive --features encryption

use chrono::Utc;
use std::fs::File;
use std::io::Write;
use ziptide::{stream_zip, ArchiveOptions, Bytes, Member, Method};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let members = vec![Member {
        name: "secrets.txt".to_string(),
        modified_at: Utc::now(),
        mode: 0o600,
        method: Method::Deflate32,
        content: Box::new(std::iter::once(Ok(Bytes::from_static(
            b"the vault combination is 12-34-56\n",
        )))),
    }];

    let options = ArchiveOptions::new().password("hunter2");

    let mut output = File::create("encrypted.zip")?;
    for block in stream_zip(members, options) {
        output.write_all(&block?)?;
    }
    println!("wrote encrypted.zip (extract with a WinZip-AES capable tool)");
    Ok(())
}
