//! Square-law N-JFET model.
//!
//! ```text
//! Id(Vg) = 0                               Vg <= Voff
//!          Yfs * (Vg - Voff)^2 / (2*Vsat)  Voff < Vg <= Voff + Vsat
//!          Yfs * (Vg - Voff - Vsat/2)      Vg > Voff + Vsat
//! ```
//!
//! `Yfs` is derived so that `Id(0) == Idss`.

use tmeter_shared::config::SimulatorConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JfetModel {
    /// mA
    pub idss: f32,
    /// V
    pub voff: f32,
    /// V
    pub vsat: f32,
}

impl JfetModel {
    pub fn new(idss: f32, voff: f32, vsat: f32) -> Self {
        Self { idss, voff, vsat }
    }

    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self::new(config.idss_ma, config.voff, config.vsat)
    }

    /// Forward transfer admittance, mA/V.
    pub fn yfs(&self) -> f32 {
        self.idss / (-self.voff - self.vsat / 2.0)
    }

    /// Drain current in mA for gate voltage `vg`.
    pub fn drain_current(&self, vg: f32) -> f32 {
        let yfs = self.yfs();
        if vg <= self.voff {
            0.0
        } else if vg <= self.voff + self.vsat {
            let over = vg - self.voff;
            yfs * over * over / (2.0 * self.vsat)
        } else {
            yfs * (vg - self.voff - self.vsat / 2.0)
        }
    }
}
