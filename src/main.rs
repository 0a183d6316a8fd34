#![deny(rust_2018_idioms, warnings)]
#![deny(clippy::all, clippy::pedantic)]

/// Streams line protocol from stdin (a pipe or terminal) to an InfluxDB write endpoint,
/// one request per line.
#[derive(Debug, clap::Parser)]
struct Options {
    /// InfluxDB HTTP address.
    #[arg(long, default_value = "127.0.0.1:8086")]
    addr: String,

    #[arg(long)]
    database: String,

    #[arg(long, short = 'u', default_value = "")]
    user: String,

    #[arg(long, short = 'p', default_value = "")]
    password: String,

    #[arg(long, default_value = "ns")]
    precision: influxdb_async::Precision,
}

const STDIN_FD: std::os::unix::io::RawFd = 0;

fn main() -> influxdb_async::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let options: Options = clap::Parser::parse();

    let address =
        std::net::ToSocketAddrs::to_socket_addrs(&options.addr)?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("{} did not resolve", options.addr)))?;
    let params = influxdb_async::ConnectionParams::new(address, options.database, options.user, options.password);

    let mut poller = influxdb_async::Poller::new()?;
    let client = std::rc::Rc::new(influxdb_async::InfluxDbClient::connect(&mut poller, params)?);
    tracing::info!(%address, "connected");

    let stdin_done = std::rc::Rc::new(std::cell::Cell::new(false));
    let _stdin = poller.add_action_always(STDIN_FD, influxdb_async::Direction::In, {
        let client = std::rc::Rc::downgrade(&client);
        let stdin_done = stdin_done.clone();
        let precision = options.precision;
        let mut pending = bytes::BytesMut::new();

        move || {
            let client = match client.upgrade() {
                Some(client) => client,
                None => return Ok(influxdb_async::ActionResult::Cancel),
            };

            let mut buf = [0_u8; 8192];
            let read = nix::unistd::read(STDIN_FD, &mut buf)?;
            pending.extend_from_slice(&buf[..read]);

            while let Some(end) = pending.iter().position(|&b| b == b'\n') {
                let line = pending.split_to(end + 1);
                if line.len() > 1 {
                    client.post(&line, precision.as_str());
                }
            }

            if read == 0 {
                if !pending.is_empty() {
                    client.post(&pending.split(), precision.as_str());
                }
                tracing::debug!("stdin closed");
                stdin_done.set(true);
                return Ok(influxdb_async::ActionResult::Cancel);
            }

            Ok(influxdb_async::ActionResult::Continue)
        }
    });

    while !(stdin_done.get() && client.is_idle()) {
        if poller.poll_once(None)? == influxdb_async::PollResult::Exit {
            break;
        }
    }

    tracing::info!("all writes flushed");
    Ok(())
}
