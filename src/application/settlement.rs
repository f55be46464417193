use super::integration::LedgerResultExt;
use super::settings::WorkflowSettings;
use crate::domain::loan::{ChargeKind, LoanSnapshot, UpfrontCharge};
use crate::domain::money::{Amount, round_money};
use crate::domain::ports::{LedgerGateway, LoanRepository};
use crate::domain::{AccountId, ChargeId, LoanId, PaymentTypeId, TransactionId};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

/// What the pre-disbursal lien processing did to the linked savings account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settlement {
    pub account_id: Option<AccountId>,
    pub fees_withdrawn: Decimal,
    pub withdrawal_transaction_id: Option<TransactionId>,
    pub amount_held: Decimal,
    pub lien_transaction_id: Option<TransactionId>,
    pub released_transaction_id: Option<TransactionId>,
    hold_charge_ids: Vec<ChargeId>,
}

/// Sums the outstanding charges of `kind`, rounded to `scale` places.
fn outstanding(charges: &[UpfrontCharge], kind: ChargeKind, scale: u32) -> (Vec<ChargeId>, Decimal) {
    let (ids, total) = charges
        .iter()
        .filter(|charge| charge.is_outstanding(kind))
        .fold((Vec::new(), Decimal::ZERO), |(mut ids, total), charge| {
            ids.push(charge.id);
            (ids, total + charge.amount_outstanding)
        });
    (ids, round_money(total, scale))
}

/// Settles upfront charges against the loan's linked savings account right
/// before disbursal.
///
/// Withdraws outstanding upfront fees and marks them paid, then places a hold
/// for outstanding upfront hold charges. The hold is only provisional: its
/// charges stay unpaid and the loan keeps its previous lien until
/// [`complete_settlement`] runs after the disbursal. A loan with no linked
/// savings account has nothing to settle.
pub(crate) async fn prepare_settlement(
    ledger: &dyn LedgerGateway,
    loans: &dyn LoanRepository,
    loan: &LoanSnapshot,
    payment_type_id: Option<PaymentTypeId>,
    settings: &WorkflowSettings,
) -> Result<Settlement> {
    let account_id = match ledger.find_loan_linked_savings_account(loan.id).await {
        Ok(account_id) => account_id,
        Err(LedgerError::NotFound(_)) => {
            debug!(loan_id = loan.id, "no linked savings account, skipping lien processing");
            return Ok(Settlement::default());
        }
        Err(err) => {
            return Err::<Settlement, _>(err).integration("find linked savings account", loan.id);
        }
    };

    let charges = loans
        .upfront_charges(loan.id)
        .await
        .integration("load upfront charges", loan.id)?;
    let mut settlement = Settlement {
        account_id: Some(account_id),
        ..Settlement::default()
    };

    let (fee_ids, fee_total) = outstanding(&charges, ChargeKind::UpfrontFee, settings.money_scale);
    if fee_total > Decimal::ZERO {
        let note = format!("Upfront fees for loan {}", loan.id);
        let transaction_id = ledger
            .withdraw_amount(
                Amount::new(fee_total)?,
                account_id,
                &note,
                None,
                payment_type_id.unwrap_or(settings.fee_payment_type_id),
            )
            .await
            .integration("withdraw upfront fees", loan.id)?;
        loans
            .mark_charges_paid(loan.id, &fee_ids)
            .await
            .integration("mark upfront fees paid", loan.id)?;
        settlement.fees_withdrawn = fee_total;
        settlement.withdrawal_transaction_id = Some(transaction_id);
    }

    let (hold_ids, hold_total) = outstanding(&charges, ChargeKind::UpfrontHold, settings.money_scale);
    if hold_total > Decimal::ZERO {
        let note = format!("Upfront hold for loan {}", loan.id);
        let transaction_id = ledger
            .hold_amount(Amount::new(hold_total)?, Some(loan.id), account_id, &note)
            .await
            .integration("hold upfront charges", loan.id)?;
        settlement.amount_held = hold_total;
        settlement.lien_transaction_id = Some(transaction_id);
        settlement.hold_charge_ids = hold_ids;
    }

    Ok(settlement)
}

/// Releases the provisional hold of a settlement whose disbursal failed.
///
/// The caller already has an error to report, so a failed release is only
/// logged.
pub(crate) async fn revert_settlement(ledger: &dyn LedgerGateway, loan_id: LoanId, settlement: &Settlement) {
    let (Some(account_id), Some(hold)) = (settlement.account_id, settlement.lien_transaction_id) else {
        return;
    };
    match ledger.release_amount(account_id, hold).await {
        Ok(()) => warn!(
            loan_id,
            account_id,
            transaction_id = hold,
            "released upfront hold after failed disbursal"
        ),
        Err(err) => error!(
            loan_id,
            account_id,
            transaction_id = hold,
            error = %err,
            "failed to release upfront hold after failed disbursal"
        ),
    }
}

/// Books a settlement once the loan is disbursed.
///
/// Marks the held charges paid, releases the lien the loan carried so far and
/// records the new one. The loan is already disbursed at this point, so
/// nothing here fails the approval: the operations that did not go through
/// are returned for the caller to report. A previous lien that is no longer
/// on the account counts as released.
pub(crate) async fn complete_settlement(
    ledger: &dyn LedgerGateway,
    loans: &dyn LoanRepository,
    loan: &LoanSnapshot,
    settlement: &mut Settlement,
) -> Vec<&'static str> {
    let mut incomplete = Vec::new();
    let Some(account_id) = settlement.account_id else {
        return incomplete;
    };

    if !settlement.hold_charge_ids.is_empty()
        && loans
            .mark_charges_paid(loan.id, &settlement.hold_charge_ids)
            .await
            .integration("mark upfront holds paid", loan.id)
            .is_err()
    {
        incomplete.push("mark upfront holds paid");
    }

    if let Some(previous) = loan.lien_transaction_id {
        match ledger.release_amount(account_id, previous).await {
            Ok(()) => settlement.released_transaction_id = Some(previous),
            Err(LedgerError::NotFound(_)) => {
                debug!(loan_id = loan.id, transaction_id = previous, "previous lien already released");
                settlement.released_transaction_id = Some(previous);
            }
            Err(err) => {
                error!(
                    loan_id = loan.id,
                    operation = "release previous lien",
                    error = %err,
                    "ledger operation failed"
                );
                incomplete.push("release previous lien");
            }
        }
    }

    // An old lien that could not be released stays recorded.
    let replaceable = loan.lien_transaction_id.is_none() || settlement.released_transaction_id.is_some();
    let changed = settlement.lien_transaction_id.is_some() || settlement.released_transaction_id.is_some();
    if replaceable
        && changed
        && loans
            .set_lien_transaction(loan.id, settlement.lien_transaction_id)
            .await
            .integration("record lien", loan.id)
            .is_err()
    {
        incomplete.push("record lien");
    }

    info!(
        loan_id = loan.id,
        account_id,
        fees_withdrawn = %settlement.fees_withdrawn,
        amount_held = %settlement.amount_held,
        "settled upfront charges"
    );
    incomplete
}
