use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A small logger export: banner, header, units, aggregation, three records.
pub const SAMPLE_EXPORT: &str = "\
\"TOA5\",\"CR1000_Station\",\"CR1000\",\"12345\",\"CR1000.Std.32\",\"CPU:weather.CR1\",\"4321\",\"Table1\"
\"TIMESTAMP\",\"RECORD\",\"BattV_Min\",\"AirTC_Avg\",\"RH\",\"Rain_mm_Tot\"
\"TS\",\"RN\",\"Volts\",\"Deg C\",\"%\",\"mm\"
\"\",\"\",\"Min\",\"Avg\",\"Smp\",\"Tot\"
\"2024-01-01 00:00:00\",0,12.61,-1.25,87,0
\"2024-01-01 00:10:00\",1,12.6,-1.5,\"NAN\",0.2
\"2024-01-01 00:20:00\",2,12.59,NAN,88,0
";

/// Build a header from string slices.
pub fn header(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Build an export with a two-column header and `records` data lines.
pub fn export_with_records(records: usize) -> String {
    let mut export = String::from("banner\n\"Timestamp\",\"Temp\"\nunits\naggregation\n");
    for i in 0..records {
        export.push_str(&format!("\"2024-01-01 {:02}:{:02}\",{}.5\n", i / 60 % 24, i % 60, i));
    }
    export
}

/// Publish captured by [`FakeBroker`]: topic and payload.
pub type Published = (String, Vec<u8>);

/// Build an export with a single record of `fields` real-valued columns
/// after the timestamp.
pub fn wide_export(fields: usize) -> String {
    let names: Vec<String> = (0..fields).map(|i| format!("\"Channel_{i:03}\"")).collect();
    let values: Vec<String> = (0..fields).map(|i| format!("{i}.0625")).collect();
    format!(
        "banner\n\"Timestamp\",{}\nunits\naggregation\n\"2024-01-01 00:00\",{}\n",
        names.join(","),
        values.join(",")
    )
}

/// Single-connection MQTT 3.1.1 broker that accepts one client and records
/// its publishes until the client disconnects. QoS 1 publishes are acked.
pub struct FakeBroker {
    port: u16,
    handle: JoinHandle<Vec<Published>>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        Self::spawn(None).await
    }

    /// Ack the first `publishes` publishes, then drop the connection.
    pub async fn start_dropping_after(publishes: usize) -> Self {
        Self::spawn(Some(publishes)).await
    }

    async fn spawn(drop_after: Option<usize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            serve(&mut stream, drop_after).await
        });
        Self { port, handle }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the client to go away and return what it published.
    pub async fn finish(self) -> Vec<Published> {
        self.handle.await.unwrap()
    }
}

async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let header = stream.read_u8().await.ok()?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.ok()?;
        len |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; len];
    stream.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

async fn serve(stream: &mut TcpStream, drop_after: Option<usize>) -> Vec<Published> {
    let mut published = Vec::new();
    let Some((0x10, _)) = read_packet(stream).await else {
        return published;
    };
    stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

    while let Some((header, body)) = read_packet(stream).await {
        match header >> 4 {
            // PUBLISH
            3 => {
                let topic_len = usize::from(u16::from_be_bytes([body[0], body[1]]));
                let topic = String::from_utf8(body[2..2 + topic_len].to_vec()).unwrap();
                let qos = (header >> 1) & 0x03;
                let mut start = 2 + topic_len;
                if qos > 0 {
                    let pkid = [body[start], body[start + 1]];
                    stream.write_all(&[0x40, 0x02, pkid[0], pkid[1]]).await.unwrap();
                    start += 2;
                }
                published.push((topic, body[start..].to_vec()));
                if drop_after == Some(published.len()) {
                    break;
                }
            }
            // PINGREQ
            12 => stream.write_all(&[0xD0, 0x00]).await.unwrap(),
            // DISCONNECT
            14 => break,
            _ => {}
        }
    }
    published
}
