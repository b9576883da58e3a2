//! Single-slot mailbox shared between processes.
//!
//! Usage:
//!   cargo run --example mailbox -p cascette-ipc -- write /tmp/box.lock "hello"
//!   cargo run --example mailbox -p cascette-ipc -- read /tmp/box.lock
//!   cargo run --example mailbox -p cascette-ipc -- remove /tmp/box.lock
//!
//! The lock file must exist. Writers take the write lock, readers the
//! read lock, and the segment keeps the last message until removed.

use cascette_ipc::{
    IpcConfig, IpcFlags, IpcLock, Lock, ShmCommand, ShmManager, derive_key,
};

/// Discriminator for the mailbox segment; the lock uses the default 0.
const SEGMENT_DISCRIMINATOR: u8 = 1;

/// Mailbox capacity including the 4-byte length prefix.
const SEGMENT_SIZE: usize = 4096;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cascette_ipc=debug")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, path) = match args.as_slice() {
        [command, path, ..] => (command.as_str(), path.as_str()),
        _ => {
            eprintln!("usage: mailbox <write|read|remove> <lock-file> [message]");
            std::process::exit(2);
        }
    };

    let key = derive_key(path, SEGMENT_DISCRIMINATOR)?;
    let shm = ShmManager::new();

    match command {
        "write" => {
            let message = args.get(2).map_or("", String::as_str);
            let lock = Lock::open(path, &IpcConfig::default())?;
            let id = shm.get(key, SEGMENT_SIZE, IpcFlags::CREATE | IpcFlags::READ_WRITE)?;
            let addr = shm.attach(id, IpcFlags::NONE)?;
            {
                let _guard = lock.write()?;
                shm.write(&addr, message.as_bytes())?;
            }
            shm.detach(addr)?;
            println!("Wrote {} bytes to segment {id}", message.len());
        }
        "read" => {
            let lock = Lock::open(path, &IpcConfig::default())?;
            let id = shm.get(key, 0, IpcFlags::NONE)?;
            let addr = shm.attach(id, IpcFlags::SHM_READ_ONLY)?;
            let payload = {
                let _guard = lock.read()?;
                shm.read(&addr)?
            };
            shm.detach(addr)?;
            println!("{}", String::from_utf8_lossy(&payload));
        }
        "remove" => {
            let id = shm.get(key, 0, IpcFlags::NONE)?;
            shm.control(id, ShmCommand::Remove)?;
            Lock::open(path, &IpcConfig::default())?.close();
            println!("Removed segment {id} and its lock");
        }
        other => {
            eprintln!("unknown command: {other}");
            std::process::exit(2);
        }
    }

    Ok(())
}
