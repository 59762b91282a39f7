//! Device-Reported Fault Decoding
//!
//! The PLC reports faults in three independent bitmask registers with
//! distinct recovery implications: non-fatal conditions clear themselves,
//! fatal conditions stop the cycle, fatal-final conditions require a power
//! intervention. Decoding never changes device status; the orchestrator
//! decides whether a condition forces a shutdown.

use super::registers::has_bit;

/// Non-fatal conditions, bit → message
pub const NON_FATAL_CONDITIONS: &[(u8, &str)] = &[
    (0, "PC response timeout"),
    (1, "Photo cycle overrun"),
    (2, "No printer ready signal"),
    (3, "Label applicator not ready"),
    (4, "Box conveyor waiting"),
];

/// Fatal conditions, bit → message
pub const FATAL_CONDITIONS: &[(u8, &str)] = &[
    (0, "Stepper motor driver error"),
    (1, "Carriage home sensor failure"),
    (2, "Carriage end-of-travel reached"),
    (3, "Insufficient camera-box distance"),
    (4, "Low light level"),
    (5, "Camera trigger failure"),
];

/// Fatal-final conditions, bit → message
pub const FATAL_FINAL_CONDITIONS: &[(u8, &str)] = &[
    (0, "220V power supply failure"),
    (1, "24V power supply failure"),
    (2, "Emergency stop engaged"),
];

/// Decoded fault snapshot from one error poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlcErrors {
    /// Raw non-fatal bitmask
    pub non_fatal: u16,
    /// Raw fatal bitmask
    pub fatal: u16,
    /// Raw fatal-final bitmask
    pub fatal_final: u16,
}

impl PlcErrors {
    pub fn new(non_fatal: u16, fatal: u16, fatal_final: u16) -> Self {
        Self {
            non_fatal,
            fatal,
            fatal_final,
        }
    }

    /// Whether any condition at any severity is reported
    pub fn any(&self) -> bool {
        self.non_fatal != 0 || self.fatal != 0 || self.fatal_final != 0
    }

    /// Decoded non-fatal conditions
    pub fn non_fatal_conditions(&self) -> Vec<&'static str> {
        decode(self.non_fatal, NON_FATAL_CONDITIONS)
    }

    /// Decoded fatal conditions
    pub fn fatal_conditions(&self) -> Vec<&'static str> {
        decode(self.fatal, FATAL_CONDITIONS)
    }

    /// Decoded fatal-final conditions
    pub fn fatal_final_conditions(&self) -> Vec<&'static str> {
        decode(self.fatal_final, FATAL_FINAL_CONDITIONS)
    }

    /// One human-readable line covering every reported condition
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        for message in self.non_fatal_conditions() {
            parts.push(format!("non-fatal: {}", message));
        }
        for message in self.fatal_conditions() {
            parts.push(format!("fatal: {}", message));
        }
        for message in self.fatal_final_conditions() {
            parts.push(format!("fatal-final: {}", message));
        }
        parts.join("; ")
    }
}

fn decode(mask: u16, table: &[(u8, &'static str)]) -> Vec<&'static str> {
    table
        .iter()
        .filter(|(bit, _)| has_bit(mask, 1 << bit))
        .map(|(_, message)| *message)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_exactly_the_set_bits() {
        let errors = PlcErrors::new(0, 0b1001, 0);
        assert_eq!(
            errors.fatal_conditions(),
            vec![
                "Stepper motor driver error",
                "Insufficient camera-box distance"
            ]
        );
        assert!(errors.non_fatal_conditions().is_empty());
        assert!(errors.fatal_final_conditions().is_empty());
    }

    #[test]
    fn clean_registers_report_nothing() {
        let errors = PlcErrors::new(0, 0, 0);
        assert!(!errors.any());
        assert_eq!(errors.summary(), "");
    }

    #[test]
    fn summary_carries_each_severity() {
        let errors = PlcErrors::new(0b100, 0b1, 0b1);
        assert!(errors.any());
        assert_eq!(
            errors.summary(),
            "non-fatal: No printer ready signal; fatal: Stepper motor driver error; \
             fatal-final: 220V power supply failure"
        );
    }
}
