//! Push a signed trigger beacon into a running daemon's ingest socket.
//!
//! Plays the part of the scanner: it builds the advertisement a paired
//! phone would broadcast and hands it over the ingest socket.
//!
//! Run with:
//! ```text
//! cargo run --example beacon_client -- <SOCKET> <PAIRING_CODE> <NONCE> [COMPANY_ID]
//! ```
//! where `PAIRING_CODE` is the `identifier|key_hex` string printed by
//! `beacon-gate enroll`.

use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use beacon_gate::auth::sign_trigger;
use beacon_gate::protocol::{wrap_payload, AdvertisementRecord, DEFAULT_COMPANY_ID};
use beacon_gate::store::CredentialKey;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!(
            "usage: {} <SOCKET> <PAIRING_CODE> <NONCE> [COMPANY_ID]",
            args.first().map(String::as_str).unwrap_or("beacon_client")
        );
        std::process::exit(2);
    }

    let socket = &args[1];
    let (identifier, key_hex) = args[2]
        .split_once('|')
        .ok_or("pairing code must look like identifier|key_hex")?;
    let key = CredentialKey::from_hex(key_hex)?;
    let nonce: u32 = args[3].parse()?;
    let company_id = match args.get(4) {
        Some(text) => u16::from_str_radix(text.trim_start_matches("0x"), 16)?,
        None => DEFAULT_COMPANY_ID,
    };

    let frame = sign_trigger(&key, nonce);
    let manufacturer_data = wrap_payload(&frame.encode(), company_id);
    let record = AdvertisementRecord::new("DE:MO:00:00:00:01", &manufacturer_data);
    let body = serde_json::to_vec(&record)?;

    println!("=== Beacon Client ===");
    println!("Credential: {}", identifier);
    println!("Nonce:      {}", nonce);
    println!("Frame:      {}", hex::encode(frame.encode()));
    println!("Adv data:   {}", record.data);

    let mut stream = UnixStream::connect(socket)?;
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(&(body.len() as u32).to_be_bytes())?;
    stream.write_all(&body)?;
    stream.flush()?;
    stream.shutdown(std::net::Shutdown::Write)?;

    // The daemon never writes back; wait for it to close the feed.
    let mut sink = Vec::new();
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let _ = stream.read_to_end(&mut sink);

    println!("Sent. Check the daemon log for the verdict.");
    Ok(())
}
