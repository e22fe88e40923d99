/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::time::Duration;

/// Tuning knobs of the virtual memory core
#[derive(Debug, Clone)]
pub struct VMConfig {
    /// If the amount of free and clear frames drops below this value,
    /// the background reclaimer is woken up
    pub low_water_frames: usize,

    /// Reclamation stops as soon as this many frames are free or clear
    pub high_water_frames: usize,

    /// Highest desperation level the reclaimer escalates to.
    ///
    /// Level 0 only considers inactive frames, level 1 adds active frames and
    /// level 2 or higher also considers modified frames.
    pub max_desperation: u8,

    /// Period of routine background sweeps
    pub background_interval: Duration,

    /// How many free frames are zeroed per background sweep
    pub scrub_batch: usize,
}

impl Default for VMConfig {
    fn default() -> Self {
        Self {
            low_water_frames: 8,
            high_water_frames: 16,
            max_desperation: 2,
            background_interval: Duration::from_millis(50),
            scrub_batch: 4,
        }
    }
}

impl VMConfig {
    /// Checks that the water marks are ordered and that reclamation can make progress.
    ///
    /// A high water mark of zero gives passes nothing to aim for and a maximum desperation
    /// of zero never considers active frames.
    pub fn validate(&self) -> Result<(), ()> {
        if self.high_water_frames < self.low_water_frames {
            return Err(());
        }

        if self.high_water_frames == 0 || self.max_desperation == 0 {
            return Err(());
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::VMConfig;

    #[test]
    fn test_config_validate() {
        assert!(VMConfig::default().validate().is_ok());

        let config = VMConfig {
            low_water_frames: 10,
            high_water_frames: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_zero_high_water() {
        let config = VMConfig {
            low_water_frames: 0,
            high_water_frames: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = VMConfig {
            low_water_frames: 0,
            high_water_frames: 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_desperation() {
        let config = VMConfig {
            max_desperation: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = VMConfig {
            max_desperation: 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
