use crate::application::deployment::DeploymentRecord;
use crate::application::presenter::WorkflowPresenter;
use crate::config::Network;
use crate::domain::address::Address;
use crate::domain::amount::{PAYMENT_DECIMALS, TokenAmount};
use crate::domain::workflow::{WorkflowId, WorkflowState};
use crate::error::Result;
use std::io::Write;

const RULE: &str = "----------------------------------------------------";

/// Writes human-readable command output to any `Write` sink (e.g. Stdout).
pub struct ReportWriter<W: Write> {
    out: W,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Prints both program addresses followed by the constants a front-end
    /// needs to talk to them.
    pub fn write_deployment(&mut self, network: Network, record: &DeploymentRecord) -> Result<()> {
        writeln!(self.out, "{RULE}")?;
        writeln!(self.out, "Payment program deployed to: {}", record.payment_program)?;
        writeln!(self.out, "Asset program deployed to: {}", record.asset_program)?;
        writeln!(self.out, "{RULE}")?;
        writeln!(self.out, "Deployment complete on {network}.")?;
        writeln!(self.out, "Front-end constants:")?;
        writeln!(
            self.out,
            "export const RWA_ADDRESS = \"{}\";",
            record.asset_program
        )?;
        writeln!(
            self.out,
            "export const USDC_ADDRESS = \"{}\";",
            record.payment_program
        )?;
        writeln!(self.out, "{RULE}")?;
        self.out.flush()?;
        Ok(())
    }

    /// One line per observed workflow state: the display status, and the
    /// stage while the workflow is still running.
    pub fn write_status(&mut self, id: WorkflowId, state: &WorkflowState) -> Result<()> {
        let status = WorkflowPresenter::present(state);
        if state.is_terminal() {
            writeln!(self.out, "[{id}] {status}")?;
        } else {
            writeln!(self.out, "[{id}] {status} ({state})")?;
        }
        self.out.flush()?;
        Ok(())
    }

    pub fn write_holdings(&mut self, account: Address, balance: TokenAmount, units: u64) -> Result<()> {
        writeln!(self.out, "Account: {account}")?;
        writeln!(
            self.out,
            "Payment balance: {}",
            balance.format_units(PAYMENT_DECIMALS)?
        )?;
        writeln!(self.out, "Asset units held: {units}")?;
        self.out.flush()?;
        Ok(())
    }
}
