/// Where and as whom to write. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionParams {
    address: std::net::SocketAddr,
    database: String,
    user: String,
    password: String,
}

impl ConnectionParams {
    pub fn new(
        address: std::net::SocketAddr,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        ConnectionParams {
            address,
            database: database.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn address(&self) -> std::net::SocketAddr {
        self.address
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Value of the `Host` header.
    pub fn host(&self) -> String {
        self.address.to_string()
    }

    /// Request target of the write endpoint. Nothing is URL-encoded.
    pub fn write_target(&self, precision: &str) -> String {
        format!(
            "/write?db={}&u={}&p={}&precision={}",
            self.database, self.user, self.password, precision,
        )
    }
}

/// Timestamp precision accepted by the write endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precision {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
}

impl Precision {
    pub fn as_str(self) -> &'static str {
        match self {
            Precision::Nanoseconds => "ns",
            Precision::Microseconds => "u",
            Precision::Milliseconds => "ms",
            Precision::Seconds => "s",
            Precision::Minutes => "m",
            Precision::Hours => "h",
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ns" | "n" => Ok(Precision::Nanoseconds),
            "u" | "us" => Ok(Precision::Microseconds),
            "ms" => Ok(Precision::Milliseconds),
            "s" => Ok(Precision::Seconds),
            "m" => Ok(Precision::Minutes),
            "h" => Ok(Precision::Hours),
            other => Err(format!("unknown precision {:?}, expected one of ns, u, ms, s, m, h", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectionParams {
        ConnectionParams::new(([127, 0, 0, 1], 8086).into(), "mydb", "u1", "p1")
    }

    #[test]
    fn write_target_substitutes_every_parameter() {
        assert_eq!(params().write_target("s"), "/write?db=mydb&u=u1&p=p1&precision=s");
    }

    #[test]
    fn write_target_does_not_escape() {
        let params = ConnectionParams::new(([10, 0, 0, 2], 80).into(), "a b", "u&x", "p=1");
        assert_eq!(params.write_target("ms"), "/write?db=a b&u=u&x&p=p=1&precision=ms");
    }

    #[test]
    fn host_is_ip_and_port() {
        assert_eq!(params().host(), "127.0.0.1:8086");
    }

    #[test]
    fn precision_parses_its_own_rendering() {
        for precision in [
            Precision::Nanoseconds,
            Precision::Microseconds,
            Precision::Milliseconds,
            Precision::Seconds,
            Precision::Minutes,
            Precision::Hours,
        ] {
            assert_eq!(precision.to_string().parse::<Precision>(), Ok(precision));
        }
        assert!("fortnight".parse::<Precision>().is_err());
    }
}
