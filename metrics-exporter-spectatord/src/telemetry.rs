use crate::{buffer::BufferSet, transport::Transport};

const LINE_BUFFER_BYTES_WRITTEN: &str = "spectator-rs.lineBuffer.bytesWritten";
const LINE_BUFFER_OVERFLOWS: &str = "spectator-rs.lineBuffer.overflows";
const LOW_LATENCY_BYTES_WRITTEN: &str = "spectator-rs.lowLatencyBuffer.bytesWritten";
const LOW_LATENCY_PCT_USAGE: &str = "spectator-rs.lowLatencyBuffer.pctUsage";
const LOW_LATENCY_OVERFLOWS: &str = "spectator-rs.lowLatencyBuffer.overflows";

#[derive(Clone, Copy)]
enum MeterType {
    Counter,
    // Gauges carry a TTL, in seconds, after which spectatord expires the value.
    Gauge { ttl_seconds: u32 },
}

#[derive(Clone, Copy)]
enum MeterValue {
    Integer(u64),
    FloatingPoint(f64),
}

/// Formats protocol lines for the buffers' own telemetry.
///
/// Lines follow the regular protocol, `<type>[,<ttl>]:<name>[,<tag>=<value>...]:<value>`, and are written straight to
/// the transport rather than through the buffer that produced them.
struct LineFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
}

impl LineFormatter {
    fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new() }
    }

    fn format(&mut self, meter_type: MeterType, name: &str, tags: &[(&str, &str)], value: MeterValue) -> String {
        let mut line = String::with_capacity(64);
        match meter_type {
            MeterType::Counter => line.push('c'),
            MeterType::Gauge { ttl_seconds } => {
                line.push_str("g,");
                line.push_str(self.int_writer.format(ttl_seconds));
            }
        }

        line.push(':');
        line.push_str(name);
        for (key, value) in tags {
            line.push(',');
            line.push_str(key);
            line.push('=');
            line.push_str(value);
        }

        line.push(':');
        match value {
            MeterValue::Integer(v) => line.push_str(self.int_writer.format(v)),
            MeterValue::FloatingPoint(v) => line.push_str(self.float_writer.format(v)),
        }
        line
    }
}

/// Reports a line buffer flush of `bytes` bytes.
pub(crate) fn line_buffer_flushed(transport: &Transport, bytes: usize) {
    let line = LineFormatter::new().format(
        MeterType::Counter,
        LINE_BUFFER_BYTES_WRITTEN,
        &[],
        MeterValue::Integer(bytes as u64),
    );
    transport.send(line.as_bytes());
}

/// Reports a line buffer flush forced by the buffer filling up.
pub(crate) fn line_buffer_overflowed(transport: &Transport) {
    let line = LineFormatter::new().format(MeterType::Counter, LINE_BUFFER_OVERFLOWS, &[], MeterValue::Integer(1));
    transport.send(line.as_bytes());
}

/// Reports the drain of one low-latency buffer set.
///
/// Nothing is reported for a set that was empty and saw no drops.
pub(crate) fn buffer_set_flushed(
    transport: &Transport,
    set: BufferSet,
    bytes: usize,
    set_capacity: usize,
    overflows: u64,
) {
    let mut formatter = LineFormatter::new();
    let tags = [("bufferSet", set.as_str())];

    if bytes > 0 {
        let line = formatter.format(
            MeterType::Counter,
            LOW_LATENCY_BYTES_WRITTEN,
            &tags,
            MeterValue::Integer(bytes as u64),
        );
        transport.send(line.as_bytes());

        let pct_usage = bytes as f64 / set_capacity.max(1) as f64;
        let line = formatter.format(
            MeterType::Gauge { ttl_seconds: 1 },
            LOW_LATENCY_PCT_USAGE,
            &tags,
            MeterValue::FloatingPoint(pct_usage),
        );
        transport.send(line.as_bytes());
    }

    if overflows > 0 {
        let line = formatter.format(
            MeterType::Counter,
            LOW_LATENCY_OVERFLOWS,
            &tags,
            MeterValue::Integer(overflows),
        );
        transport.send(line.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    #[test]
    fn formats_counters_and_gauges() {
        let mut formatter = LineFormatter::new();

        let cases = [
            (MeterType::Counter, "requests", &[][..], MeterValue::Integer(42), "c:requests:42"),
            (
                MeterType::Counter,
                "requests",
                &[("status", "200"), ("app", "www")][..],
                MeterValue::Integer(7),
                "c:requests,status=200,app=www:7",
            ),
            (
                MeterType::Gauge { ttl_seconds: 1 },
                "usage",
                &[("bufferSet", "back")][..],
                MeterValue::FloatingPoint(12.5),
                "g,1:usage,bufferSet=back:12.5",
            ),
            (MeterType::Gauge { ttl_seconds: 60 }, "temp", &[][..], MeterValue::FloatingPoint(3.0), "g,60:temp:3.0"),
        ];

        for (meter_type, name, tags, value, expected) in cases {
            assert_eq!(formatter.format(meter_type, name, tags, value), expected);
        }
    }

    #[test]
    fn line_buffer_report() {
        let transport = Transport::Memory(MemoryTransport::default());
        line_buffer_flushed(&transport, 27);
        line_buffer_overflowed(&transport);

        let lines = transport.as_memory().unwrap().lines();
        assert_eq!(
            lines,
            vec!["c:spectator-rs.lineBuffer.bytesWritten:27", "c:spectator-rs.lineBuffer.overflows:1"]
        );
    }

    #[test]
    fn buffer_set_report() {
        let transport = Transport::Memory(MemoryTransport::default());
        buffer_set_flushed(&transport, BufferSet::Front, 512, 1024, 0);
        buffer_set_flushed(&transport, BufferSet::Back, 0, 1024, 3);
        buffer_set_flushed(&transport, BufferSet::Front, 0, 1024, 0);

        let lines = transport.as_memory().unwrap().lines();
        assert_eq!(
            lines,
            vec![
                "c:spectator-rs.lowLatencyBuffer.bytesWritten,bufferSet=front:512",
                "g,1:spectator-rs.lowLatencyBuffer.pctUsage,bufferSet=front:0.5",
                "c:spectator-rs.lowLatencyBuffer.overflows,bufferSet=back:3",
            ]
        );
    }
}
