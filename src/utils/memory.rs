//! Memory estimates for a model deployment.

use crate::config::ModelConfig;

/// Weight memory of a deployment, derived from its shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryEstimate {
    pub parameters: usize,
    pub parameters_per_layer: usize,
    /// Weight bytes at the configured precision
    pub total_bytes: u64,
    /// Weight bytes held by each model-parallel partition
    pub partition_bytes: u64,
}

impl MemoryEstimate {
    pub fn for_model(model: &ModelConfig) -> Self {
        let parameters = model.estimated_parameters();
        Self {
            parameters,
            parameters_per_layer: model.params_per_layer(),
            total_bytes: (parameters * model.precision.bytes()) as u64,
            partition_bytes: model.bytes_per_partition() as u64,
        }
    }

    /// Whether one partition fits a device of `device_bytes`, leaving `headroom`
    /// (a fraction of the device) for activations
    pub fn fits(&self, device_bytes: u64, headroom: f64) -> bool {
        (self.partition_bytes as f64) <= device_bytes as f64 * (1.0 - headroom.clamp(0.0, 1.0))
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format a parameter count as `~1.2B` / `~3.4M`
pub fn format_count(count: usize) -> String {
    let count = count as f64;
    if count >= 1e9 {
        format!("~{:.1}B", count / 1e9)
    } else if count >= 1e6 {
        format!("~{:.1}M", count / 1e6)
    } else {
        format!("{}", count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 bytes");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(130_000_000_000), "~130.0B");
        assert_eq!(format_count(2_500_000), "~2.5M");
        assert_eq!(format_count(42), "42");
    }

    #[test]
    fn test_glm_130b_estimate() {
        let estimate = MemoryEstimate::for_model(&ModelConfig::glm_130b());

        // 70 layers of 12288 hidden / 32768 inner plus the 150528-token embedding
        assert!(estimate.parameters > 125_000_000_000 && estimate.parameters < 135_000_000_000);
        assert_eq!(estimate.partition_bytes, estimate.total_bytes / 8);
        assert!(estimate.fits(80 * 1024 * 1024 * 1024, 0.2));
        assert!(!estimate.fits(24 * 1024 * 1024 * 1024, 0.0));
    }
}
