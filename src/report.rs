use crate::stats::Summary;

/// Scales a value into SI range and returns the matching suffix, decimal for
/// magnitudes above one and sub-unit for fractions, matching the classic
/// `6.55kB in 1.2ms 5.46MB/s` transfer-report shape.
fn si(mut value: f64) -> (f64, &'static str) {
    const UP: [&str; 6] = ["", "k", "M", "G", "T", "P"];
    const DOWN: [&str; 3] = ["m", "µ", "n"];

    if value == 0.0 || !value.is_finite() {
        return (value, "");
    }
    if value >= 1.0 {
        let mut idx = 0;
        while value >= 1000.0 && idx < UP.len() - 1 {
            value /= 1000.0;
            idx += 1;
        }
        (value, UP[idx])
    } else {
        let mut idx = 0;
        while value < 1.0 && idx < DOWN.len() {
            value *= 1000.0;
            idx += 1;
        }
        (value, DOWN[idx - 1])
    }
}

/// One line with total bytes, elapsed time and aggregate rate.
pub fn transfer_line(summary: &Summary) -> String {
    let (bytes, b_suffix) = si(summary.bytes as f64);
    let (elapsed, e_suffix) = si(summary.elapsed.as_secs_f64());
    let (rate, r_suffix) = si(summary.throughput());
    format!("{bytes:6.2}{b_suffix}B in {elapsed:<6.1}{e_suffix}s   {rate:6.2}{r_suffix}B/s")
}

/// One line with the derived one-way latency figures.
pub fn latency_line(summary: &Summary) -> String {
    format!(
        "Latency: avg = {:.3} µs, min = {:.3} µs, max = {:.3} µs (one-way)",
        summary.mean_one_way().as_secs_f64() * 1e6,
        summary.min_gap.as_secs_f64() * 1e6,
        summary.max_gap.as_secs_f64() * 1e6,
    )
}

pub fn print_summary(summary: &Summary) {
    println!("{}", transfer_line(summary));
    println!("{}", latency_line(summary));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn summary(bytes: usize, elapsed: Duration) -> Summary {
        Summary {
            samples: 16,
            bytes,
            elapsed,
            min_gap: Duration::from_micros(3),
            max_gap: Duration::from_micros(90),
        }
    }

    #[test]
    fn scales_up_and_down() {
        assert_eq!(si(0.0), (0.0, ""));
        assert_eq!(si(512.0), (512.0, ""));
        assert_eq!(si(65536.0).1, "k");
        assert_eq!(si(2e9).1, "G");
        assert_eq!(si(0.0042).1, "m");
        assert_eq!(si(42e-9).1, "n");
    }

    #[test]
    fn transfer_line_carries_all_three_figures() {
        let line = transfer_line(&summary(65536, Duration::from_millis(2)));
        assert!(line.contains("kB in"), "{line}");
        assert!(line.contains("ms"), "{line}");
        assert!(line.ends_with("B/s"), "{line}");
    }

    #[test]
    fn latency_line_reports_microseconds() {
        let line = latency_line(&summary(65536, Duration::from_millis(2)));
        assert!(line.starts_with("Latency: avg = "), "{line}");
        assert!(line.contains("min = 3.000 µs"), "{line}");
        assert!(line.contains("max = 90.000 µs"), "{line}");
    }
}
