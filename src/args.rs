use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::Parser;

#[derive(Parser, Debug)]
pub struct Args {
    /// Whether feedbox is served over https.
    /// If so, cookies are sent with the Secure attribute.
    #[arg(short, long)]
    secure: bool,

    /// The address feedbox should listen on. By default
    /// feedbox will listen just on the IPv4 loopback.
    #[arg(short, long)]
    address: Option<String>,

    /// The port feedbox listens on.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Directory holding the sqlite database, created if missing.
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    /// bcrypt cost used when hashing new passwords.
    #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
    hash_cost: u32,
}

impl Args {
    pub fn addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.address
            .as_deref()
            .unwrap_or("127.0.0.1")
            .parse()
            .map(|addr: IpAddr| (addr, self.port).into())
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn hash_cost(&self) -> u32 {
        self.hash_cost
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::parse_from(["feedbox"]);

        assert_eq!(args.addr().unwrap(), "127.0.0.1:8080".parse().unwrap());
        assert!(!args.secure());
        assert_eq!(args.data_dir(), Path::new("."));
        assert_eq!(args.hash_cost(), bcrypt::DEFAULT_COST);
    }

    #[test]
    fn overrides() {
        let args = Args::parse_from([
            "feedbox", "--secure", "-a", "::1", "-p", "5000", "-d", "/var/lib/feedbox",
            "--hash-cost", "10",
        ]);

        assert_eq!(args.addr().unwrap(), "[::1]:5000".parse().unwrap());
        assert!(args.secure());
        assert_eq!(args.data_dir(), Path::new("/var/lib/feedbox"));
        assert_eq!(args.hash_cost(), 10);

        let bad = Args::parse_from(["feedbox", "-a", "localhost"]);
        assert!(bad.addr().is_err());
    }
}
