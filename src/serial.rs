//! Serial link to the counter firmware.
//!
//! Provides port discovery, opening with the `serialport` crate, and [`LineReader`],
//! which frames the byte stream into lines while tolerating read timeouts.

use crate::error::{AppResult, BridgeError};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::time::Duration;
use tracing::{debug, warn};

/// Lines longer than this without a newline are discarded.
pub const MAX_LINE_BYTES: usize = 4096;

/// Substrings identifying USB-serial bridges (CP210x, CH340, FTDI) across platforms.
const SENSOR_PORT_HINTS: &[&str] = &["usbserial", "USB"];

/// Result of one attempt to read a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line, terminator included, bytes undecoded
    Line(Vec<u8>),
    /// The read timed out before a full line arrived
    Idle,
    /// The stream ended; the device is gone
    Closed,
}

/// Frames a byte stream into newline-terminated lines.
///
/// Bytes received before a read timeout are kept and completed by later reads, so
/// a line split across a timeout is delivered exactly once. At most
/// [`MAX_LINE_BYTES`] are buffered; a longer line is dropped whole, up to and
/// including its terminator.
pub struct LineReader<R: Read> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    discarding: bool,
}

impl<R: Read> LineReader<R> {
    /// Wrap any byte source (a serial port, or a `Cursor` in tests).
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
            discarding: false,
        }
    }

    /// Read until a newline, a timeout, the end of the stream, or a full buffer.
    ///
    /// Timeouts and interrupts are [`ReadOutcome::Idle`], as is a read that only
    /// dropped bytes of an oversized line. Any other I/O failure is returned as
    /// [`BridgeError::SerialIo`].
    pub fn read_line(&mut self) -> AppResult<ReadOutcome> {
        // One byte past the limit marks the line as oversized
        let room = (MAX_LINE_BYTES + 1).saturating_sub(self.pending.len()) as u64;
        let result = self
            .reader
            .by_ref()
            .take(room)
            .read_until(b'\n', &mut self.pending);

        match result {
            Ok(0) if self.pending.is_empty() => Ok(ReadOutcome::Closed),
            // A full line, a full buffer, or the unterminated tail before end of stream
            Ok(_) => Ok(self.take_line()),
            Err(e) if is_transient(e.kind()) => {
                self.drop_if_oversized();
                Ok(ReadOutcome::Idle)
            }
            Err(e) => Err(BridgeError::SerialIo(e)),
        }
    }

    fn take_line(&mut self) -> ReadOutcome {
        let terminated = self.pending.last() == Some(&b'\n');
        if self.drop_if_oversized() {
            // Terminated only when the newline was the byte past the limit
            self.discarding = !terminated;
            return ReadOutcome::Idle;
        }

        let line = std::mem::take(&mut self.pending);
        if self.discarding {
            self.discarding = !terminated;
            debug!(bytes = line.len(), "Dropped remainder of oversized serial line");
            return ReadOutcome::Idle;
        }
        ReadOutcome::Line(line)
    }

    /// Clears the buffer once it exceeds [`MAX_LINE_BYTES`]; the rest of the line
    /// is then dropped as it arrives.
    fn drop_if_oversized(&mut self) -> bool {
        if self.pending.len() <= MAX_LINE_BYTES {
            return false;
        }
        warn!(
            bytes = self.pending.len(),
            "Discarding oversized serial line"
        );
        self.pending.clear();
        self.discarding = true;
        true
    }

    /// Give back the wrapped source.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

/// Open the sensor port in raw 8N1 mode without flow control.
pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> AppResult<Box<dyn SerialPort>> {
    // On Windows, COM ports >= 10 need the \\.\COMxx format
    #[cfg(target_os = "windows")]
    let port_name = &if port_name.starts_with("COM") && !port_name.starts_with(r"\\") {
        format!(r"\\.\{}", port_name)
    } else {
        port_name.to_string()
    };

    let port = serialport::new(port_name, baud_rate)
        .timeout(timeout)
        .flow_control(serialport::FlowControl::None)
        .open()?;

    debug!(port = %port_name, baud_rate, "Serial port opened");
    Ok(port)
}

/// Enumerate the serial ports visible to the OS.
pub fn available_ports() -> AppResult<Vec<SerialPortInfo>> {
    Ok(serialport::available_ports()?)
}

/// Choose the first port that looks like a USB-serial bridge.
pub fn pick_sensor_port(ports: &[SerialPortInfo]) -> Option<String> {
    ports
        .iter()
        .find(|p| SENSOR_PORT_HINTS.iter().any(|hint| p.port_name.contains(hint)))
        .map(|p| p.port_name.clone())
}

/// Enumerate ports and choose the sensor.
pub fn detect_sensor_port() -> AppResult<Option<String>> {
    Ok(pick_sensor_port(&available_ports()?))
}

/// One-line human description of a port.
pub fn describe_port(port: &SerialPortInfo) -> String {
    match &port.port_type {
        SerialPortType::UsbPort(info) => {
            let mut out = format!(
                "{} - USB (VID: 0x{:04x}, PID: 0x{:04x})",
                port.port_name, info.vid, info.pid
            );
            if let Some(product) = &info.product {
                out.push_str(&format!(" {}", product));
            }
            if let Some(manufacturer) = &info.manufacturer {
                out.push_str(&format!(" [{}]", manufacturer));
            }
            out
        }
        SerialPortType::PciPort => format!("{} - PCI", port.port_name),
        SerialPortType::BluetoothPort => format!("{} - Bluetooth", port.port_name),
        SerialPortType::Unknown => format!("{} - Unknown", port.port_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;
    use std::io::{self, Cursor};

    fn port(name: &str, port_type: SerialPortType) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type,
        }
    }

    /// Replays scripted reads, including timeouts.
    struct ScriptedPort {
        steps: Vec<io::Result<Vec<u8>>>,
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.steps.is_empty() {
                return Ok(0);
            }
            match self.steps.remove(0) {
                Ok(bytes) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Err(e) => Err(e),
            }
        }
    }

    #[test]
    fn reads_lines_then_closed() {
        let mut reader = LineReader::new(Cursor::new(b"first\r\nsecond\n".to_vec()));
        assert_eq!(
            reader.read_line().unwrap(),
            ReadOutcome::Line(b"first\r\n".to_vec())
        );
        assert_eq!(
            reader.read_line().unwrap(),
            ReadOutcome::Line(b"second\n".to_vec())
        );
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Closed);
    }

    #[test]
    fn unterminated_tail_is_delivered_before_close() {
        let mut reader = LineReader::new(Cursor::new(b"tail".to_vec()));
        assert_eq!(
            reader.read_line().unwrap(),
            ReadOutcome::Line(b"tail".to_vec())
        );
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Closed);
    }

    #[test]
    fn line_split_by_timeout_is_delivered_once() {
        let mut reader = LineReader::new(ScriptedPort {
            steps: vec![
                Ok(b"Count: 1, Ti".to_vec()),
                Err(io::Error::new(ErrorKind::TimedOut, "timeout")),
                Ok(b"me: 10 ms\n".to_vec()),
            ],
        });
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Idle);
        assert_eq!(
            reader.read_line().unwrap(),
            ReadOutcome::Line(b"Count: 1, Time: 10 ms\n".to_vec())
        );
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Closed);
    }

    #[test]
    fn hard_io_error_is_reported() {
        let mut reader = LineReader::new(ScriptedPort {
            steps: vec![Err(io::Error::new(ErrorKind::BrokenPipe, "unplugged"))],
        });
        assert!(matches!(
            reader.read_line(),
            Err(BridgeError::SerialIo(e)) if e.kind() == ErrorKind::BrokenPipe
        ));
    }

    fn lines_until_closed<R: Read>(reader: &mut LineReader<R>) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        loop {
            match reader.read_line().unwrap() {
                ReadOutcome::Line(line) => lines.push(line),
                ReadOutcome::Idle => {}
                ReadOutcome::Closed => return lines,
            }
        }
    }

    #[test]
    fn oversized_line_is_dropped() {
        let mut data = vec![b'x'; MAX_LINE_BYTES + 10];
        data.extend_from_slice(b"\nok\n");
        let mut reader = LineReader::new(Cursor::new(data));
        assert_eq!(lines_until_closed(&mut reader), vec![b"ok\n".to_vec()]);
    }

    #[test]
    fn line_at_the_limit_is_kept() {
        let mut line = vec![b'x'; MAX_LINE_BYTES - 1];
        line.push(b'\n');
        let mut reader = LineReader::new(Cursor::new(line.clone()));
        assert_eq!(lines_until_closed(&mut reader), vec![line]);
    }

    #[test]
    fn oversized_remainder_after_timeout_is_dropped() {
        let mut reader = LineReader::new(ScriptedPort {
            steps: vec![
                Ok(vec![b'x'; MAX_LINE_BYTES + 10]),
                Err(io::Error::new(ErrorKind::TimedOut, "timeout")),
                Ok(b"Count: 9, Time: 90 ms\n".to_vec()),
                Ok(b"Count: 1, Time: 10 ms\n".to_vec()),
            ],
        });
        assert_eq!(
            lines_until_closed(&mut reader),
            vec![b"Count: 1, Time: 10 ms\n".to_vec()]
        );
    }

    #[test]
    fn endless_line_without_timeout_stays_bounded() {
        let mut reader = LineReader::new(io::repeat(b'x'));
        for _ in 0..8 {
            assert_eq!(reader.read_line().unwrap(), ReadOutcome::Idle);
            assert!(reader.pending.len() <= MAX_LINE_BYTES);
        }
    }

    #[test]
    fn picks_usb_serial_port() {
        let ports = vec![
            port("/dev/cu.Bluetooth-Incoming-Port", SerialPortType::BluetoothPort),
            port("/dev/ttyS0", SerialPortType::Unknown),
            port("/dev/cu.usbserial-10", SerialPortType::Unknown),
            port("/dev/ttyUSB0", SerialPortType::Unknown),
        ];
        assert_eq!(
            pick_sensor_port(&ports).as_deref(),
            Some("/dev/cu.usbserial-10")
        );
        assert_eq!(
            pick_sensor_port(&ports[3..]).as_deref(),
            Some("/dev/ttyUSB0")
        );
    }

    #[test]
    fn no_usb_port_means_none() {
        let ports = vec![
            port("/dev/ttyS0", SerialPortType::Unknown),
            port("/dev/ttyACM0", SerialPortType::PciPort),
        ];
        assert_eq!(pick_sensor_port(&ports), None);
        assert_eq!(pick_sensor_port(&[]), None);
    }

    #[test]
    fn describes_usb_port() {
        let info = port(
            "/dev/ttyUSB0",
            SerialPortType::UsbPort(UsbPortInfo {
                vid: 0x10c4,
                pid: 0xea60,
                serial_number: None,
                manufacturer: Some("Silicon Labs".to_string()),
                product: Some("CP2102 USB to UART".to_string()),
            }),
        );
        let text = describe_port(&info);
        assert!(text.contains("0x10c4"));
        assert!(text.contains("CP2102"));
        assert!(text.contains("Silicon Labs"));
    }
}
