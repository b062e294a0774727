use std::collections::HashMap;

use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::cashbox::CashBalance;
use crate::category::{select_category, ClientCategory};
use crate::config::EngineConfig;
use crate::credit::Credit;
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore, NotificationSink, NullSink};
use crate::ledger::{self, Payment};
use crate::schedule;
use crate::types::{
    CashBoxId, ClientId, CreditId, CreditStatus, InstallmentProjection, InstallmentStatus,
    PaymentId, PaymentMethod, PaymentStatus, UserId,
};

/// a client as the engine sees them; identity lives in the external
/// directory, the engine only tracks risk standing and overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: ClientId,
    pub category_code: String,
    /// per-client override of the category's maximum credit amount
    pub custom_credit_limit: Option<Money>,
}

/// result of the dual-path counter verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterCheck {
    pub stored_balance: Money,
    pub recomputed_balance: Money,
    pub stored_paid_installments: u32,
    pub recomputed_paid_installments: u32,
}

impl CounterCheck {
    pub fn consistent(&self) -> bool {
        self.stored_balance == self.recomputed_balance
            && self.stored_paid_installments == self.recomputed_paid_installments
    }
}

/// the application service: owns all aggregates, is the transaction
/// boundary, and fans events out to the notification sink after each
/// successful operation
pub struct LoanEngine {
    pub config: EngineConfig,
    categories: Vec<ClientCategory>,
    clients: HashMap<ClientId, ClientRecord>,
    credits: HashMap<CreditId, Credit>,
    payments: HashMap<PaymentId, Payment>,
    cash_boxes: HashMap<CashBoxId, CashBalance>,
    box_index: HashMap<(UserId, NaiveDate), CashBoxId>,
    events: EventStore,
    sink: Box<dyn NotificationSink>,
}

impl LoanEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_categories(config, crate::category::default_categories())
    }

    pub fn with_categories(config: EngineConfig, categories: Vec<ClientCategory>) -> Self {
        Self {
            config,
            categories,
            clients: HashMap::new(),
            credits: HashMap::new(),
            payments: HashMap::new(),
            cash_boxes: HashMap::new(),
            box_index: HashMap::new(),
            events: EventStore::new(),
            sink: Box::new(NullSink),
        }
    }

    /// install the notification boundary; sink failures never roll back
    pub fn set_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sink = sink;
    }

    pub fn register_client(&mut self, client: ClientRecord) {
        self.clients.insert(client.id, client);
    }

    pub fn client(&self, id: ClientId) -> Option<&ClientRecord> {
        self.clients.get(&id)
    }

    pub fn credit(&self, id: CreditId) -> Option<&Credit> {
        self.credits.get(&id)
    }

    pub fn payment(&self, id: PaymentId) -> Option<&Payment> {
        self.payments.get(&id)
    }

    pub fn cash_box(&self, id: CashBoxId) -> Option<&CashBalance> {
        self.cash_boxes.get(&id)
    }

    pub fn cash_box_for(&self, collector: UserId, date: NaiveDate) -> Option<&CashBalance> {
        self.box_index
            .get(&(collector, date))
            .and_then(|id| self.cash_boxes.get(id))
    }

    /// drain events collected so far (tests and batch consumers)
    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.take_events()
    }

    // ---- credit lifecycle ----

    /// create a credit, gated by the client's risk category
    pub fn create_credit(
        &mut self,
        client_id: ClientId,
        creator: UserId,
        amount: Money,
        interest_rate: Rate,
        periodicity: crate::types::Periodicity,
        total_installments: u32,
        clock: &SafeTimeProvider,
    ) -> Result<Credit> {
        let mark = self.events.events().len();
        let client = self
            .clients
            .get(&client_id)
            .ok_or(LedgerError::ClientNotFound { id: client_id })?;
        let category = self
            .categories
            .iter()
            .find(|c| c.code == client.category_code)
            .ok_or_else(|| LedgerError::Validation {
                message: format!("unknown category code {}", client.category_code),
            })?;

        if !category.can_create_new_credit() {
            return Err(LedgerError::Eligibility {
                reason: category.block_reason(),
            });
        }
        let limit = client.custom_credit_limit.or(category.max_credit_amount);
        if let Some(limit) = limit {
            if amount > limit {
                return Err(LedgerError::Eligibility {
                    reason: format!(
                        "requested {amount} exceeds the {} limit of {limit}",
                        category.code
                    ),
                });
            }
        }
        if let Some(max_active) = category.max_active_credits {
            let active = self
                .credits
                .values()
                .filter(|c| c.client_id == client_id && !c.status.is_terminal())
                .count() as u32;
            if active >= max_active {
                return Err(LedgerError::Eligibility {
                    reason: format!(
                        "client already has {active} open credits, category {} allows {max_active}",
                        category.code
                    ),
                });
            }
        }

        // tenant setting: custom rates may be disallowed
        let rate = if self.config.settings.allow_custom_interest {
            interest_rate
        } else {
            self.config.settings.default_interest_rate
        };

        let credit = Credit::new(
            Uuid::new_v4(),
            client_id,
            creator,
            amount,
            rate,
            periodicity,
            total_installments,
            clock,
        )?;
        self.events.emit(Event::CreditCreated {
            credit_id: credit.id,
            client_id,
            principal: credit.principal,
            total_amount: credit.total_amount,
        });
        self.credits.insert(credit.id, credit.clone());
        self.dispatch(mark);
        Ok(credit)
    }

    pub fn approve_credit(
        &mut self,
        credit_id: CreditId,
        approver: UserId,
        scheduled_date: NaiveDate,
        notes: Option<String>,
        clock: &SafeTimeProvider,
    ) -> Result<Credit> {
        let mark = self.events.events().len();
        let credit = self.credit_mut(credit_id)?;
        credit
            .approve_for_delivery(approver, scheduled_date, notes, clock)
            .map_err(log_illegal)?;
        let snapshot = credit.clone();
        self.events.emit(Event::CreditApproved {
            credit_id,
            approved_by: approver,
            scheduled_delivery_date: scheduled_date,
            timestamp: clock.now(),
        });
        self.dispatch(mark);
        Ok(snapshot)
    }

    pub fn reject_credit(
        &mut self,
        credit_id: CreditId,
        rejecter: UserId,
        reason: &str,
        clock: &SafeTimeProvider,
    ) -> Result<Credit> {
        let mark = self.events.events().len();
        let credit = self.credit_mut(credit_id)?;
        credit.reject(rejecter, reason, clock).map_err(log_illegal)?;
        let snapshot = credit.clone();
        self.events.emit(Event::CreditRejected {
            credit_id,
            rejected_by: rejecter,
            reason: reason.to_string(),
            timestamp: clock.now(),
        });
        self.dispatch(mark);
        Ok(snapshot)
    }

    /// hand the cash over: activates the credit, fixes the schedule bounds
    /// and charges the delivery against the collector's box of the day
    pub fn deliver_credit(
        &mut self,
        credit_id: CreditId,
        deliverer: UserId,
        notes: Option<String>,
        clock: &SafeTimeProvider,
    ) -> Result<Credit> {
        let mark = self.events.events().len();
        let schedule_config = self.config.schedule.clone();
        let credit = self.credit_mut(credit_id)?;
        credit
            .deliver_to_client(deliverer, notes, &schedule_config, clock)
            .map_err(log_illegal)?;
        let principal = credit.principal;
        let start_date = credit.start_date;
        let end_date = credit.end_date;

        let box_id = self.find_or_open_box(deliverer, clock.now().date_naive());
        if let Some(cash_box) = self.cash_boxes.get_mut(&box_id) {
            cash_box.record_delivery(principal);
        }
        let credit = self.credit_mut(credit_id)?;
        credit.funding_cash_box = Some(box_id);
        let snapshot = credit.clone();

        self.events.emit(Event::CreditDelivered {
            credit_id,
            delivered_by: deliverer,
            start_date: start_date.unwrap_or_default(),
            end_date: end_date.unwrap_or_default(),
            timestamp: clock.now(),
        });
        self.dispatch(mark);
        Ok(snapshot)
    }

    pub fn reschedule_delivery(
        &mut self,
        credit_id: CreditId,
        new_date: NaiveDate,
        actor: UserId,
        reason: &str,
        clock: &SafeTimeProvider,
    ) -> Result<Credit> {
        let mark = self.events.events().len();
        let credit = self.credit_mut(credit_id)?;
        credit
            .reschedule_delivery(new_date, actor, reason, clock)
            .map_err(log_illegal)?;
        let snapshot = credit.clone();
        self.events.emit(Event::DeliveryRescheduled {
            credit_id,
            new_date,
            actor,
            reason: reason.to_string(),
            timestamp: clock.now(),
        });
        self.dispatch(mark);
        Ok(snapshot)
    }

    /// cancel a credit before completion
    pub fn cancel_credit(
        &mut self,
        credit_id: CreditId,
        actor: UserId,
        reason: &str,
        clock: &SafeTimeProvider,
    ) -> Result<Credit> {
        let mark = self.events.events().len();
        let credit = self.credit_mut(credit_id)?;
        credit.cancel(actor, reason, clock).map_err(log_illegal)?;
        let snapshot = credit.clone();
        self.events.emit(Event::CreditCancelled {
            credit_id,
            actor,
            reason: reason.to_string(),
            timestamp: clock.now(),
        });
        self.dispatch(mark);
        Ok(snapshot)
    }

    /// write off an active credit as unrecoverable
    pub fn default_credit(&mut self, credit_id: CreditId, clock: &SafeTimeProvider) -> Result<Credit> {
        let mark = self.events.events().len();
        let credit = self.credit_mut(credit_id)?;
        credit.mark_defaulted(clock).map_err(log_illegal)?;
        let snapshot = credit.clone();
        self.events.emit(Event::CreditDefaulted {
            credit_id,
            remaining_balance: snapshot.balance,
            timestamp: clock.now(),
        });
        self.dispatch(mark);
        Ok(snapshot)
    }

    // ---- payment ledger ----

    /// record a collected payment; one atomic effect across the credit,
    /// the collector's cash box and the client's risk category
    pub fn record_payment(
        &mut self,
        credit_id: CreditId,
        amount: Money,
        installment_number: Option<u32>,
        method: PaymentMethod,
        collector: UserId,
        expected_version: Option<u64>,
        clock: &SafeTimeProvider,
    ) -> Result<Payment> {
        let mark = self.events.events().len();
        let others = self.installment_total(credit_id, installment_number, None);

        let credit = self.credit_mut(credit_id)?;
        check_version(credit.version, expected_version)?;
        if credit.status != CreditStatus::Active {
            return Err(log_illegal(LedgerError::IllegalTransition {
                operation: "record_payment",
                current: credit.status,
            }));
        }
        if let Some(n) = installment_number {
            if n == 0 || n > credit.total_installments {
                return Err(LedgerError::Validation {
                    message: format!("installment {n} outside 1..={}", credit.total_installments),
                });
            }
        }

        let mut payment = Payment {
            id: Uuid::new_v4(),
            credit_id,
            amount,
            applied_amount: Money::ZERO,
            method,
            status: PaymentStatus::Completed,
            installment_number,
            collected_by: collector,
            cash_box: None,
            timestamp: clock.now(),
        };
        let application = ledger::apply_create(credit, &mut payment, others)?;
        let client_id = credit.client_id;
        let new_balance = credit.balance;
        let paid_installments = credit.paid_installments;
        let completed = credit.status == CreditStatus::Completed;
        let total_paid = credit.total_paid;

        // the collected cash lands in the collector's box of the day
        let box_id = self.find_or_open_box(collector, clock.now().date_naive());
        if let Some(cash_box) = self.cash_boxes.get_mut(&box_id) {
            cash_box.record_collection(amount);
        }
        payment.cash_box = Some(box_id);
        self.payments.insert(payment.id, payment.clone());

        self.events.emit(Event::PaymentRecorded {
            payment_id: payment.id,
            credit_id,
            amount,
            classification: application.classification,
            new_balance,
            timestamp: clock.now(),
        });
        if application.installment_completed {
            self.events.emit(Event::InstallmentCompleted {
                credit_id,
                installment_number: installment_number.unwrap_or(0),
                paid_installments,
            });
        }
        if completed {
            self.events.emit(Event::CreditCompleted {
                credit_id,
                total_paid,
                timestamp: clock.now(),
            });
        }

        self.recalculate_client_category(client_id, clock.now().date_naive());
        self.dispatch(mark);
        Ok(payment)
    }

    /// edit a payment's amount or status; routed through the same delta
    /// logic as creation, never a direct field write
    pub fn edit_payment(
        &mut self,
        payment_id: PaymentId,
        new_amount: Option<Money>,
        new_status: Option<PaymentStatus>,
        expected_version: Option<u64>,
        clock: &SafeTimeProvider,
    ) -> Result<Payment> {
        let mark = self.events.events().len();
        let mut payment = self
            .payments
            .get(&payment_id)
            .cloned()
            .ok_or(LedgerError::PaymentNotFound { id: payment_id })?;
        let others =
            self.installment_total(payment.credit_id, payment.installment_number, Some(payment_id));
        let old_cash = cash_effect(&payment);

        let credit = self.credit_mut(payment.credit_id)?;
        check_version(credit.version, expected_version)?;
        let client_id = credit.client_id;
        let status_before = credit.status;
        let delta =
            ledger::apply_update(credit, &mut payment, new_amount, new_status, others)?;
        let status_after = credit.status;
        let owning_credit = payment.credit_id;

        let new_cash = cash_effect(&payment);
        if let Some(box_id) = payment.cash_box {
            if let Some(cash_box) = self.cash_boxes.get_mut(&box_id) {
                cash_box.adjust_collection(new_cash - old_cash);
            }
        }
        self.payments.insert(payment_id, payment.clone());

        self.events.emit(Event::PaymentEdited {
            payment_id,
            credit_id: owning_credit,
            balance_delta: delta,
            timestamp: clock.now(),
        });
        if status_after != status_before {
            self.events.emit(Event::StatusChanged {
                credit_id: owning_credit,
                old_status: status_before,
                new_status: status_after,
                timestamp: clock.now(),
            });
        }
        self.recalculate_client_category(client_id, clock.now().date_naive());
        self.dispatch(mark);
        Ok(payment)
    }

    /// delete a payment, symmetrically undoing its contribution
    pub fn delete_payment(
        &mut self,
        payment_id: PaymentId,
        expected_version: Option<u64>,
        clock: &SafeTimeProvider,
    ) -> Result<()> {
        let mark = self.events.events().len();
        let payment = self
            .payments
            .get(&payment_id)
            .cloned()
            .ok_or(LedgerError::PaymentNotFound { id: payment_id })?;
        let others =
            self.installment_total(payment.credit_id, payment.installment_number, Some(payment_id));

        let credit = self.credit_mut(payment.credit_id)?;
        check_version(credit.version, expected_version)?;
        let client_id = credit.client_id;
        let status_before = credit.status;
        let restored = ledger::apply_delete(credit, &payment, others);
        let status_after = credit.status;

        if let Some(box_id) = payment.cash_box {
            if let Some(cash_box) = self.cash_boxes.get_mut(&box_id) {
                cash_box.adjust_collection(Money::ZERO - cash_effect(&payment));
            }
        }
        self.payments.remove(&payment_id);

        self.events.emit(Event::PaymentReversed {
            payment_id,
            credit_id: payment.credit_id,
            amount_restored: restored,
            timestamp: clock.now(),
        });
        if status_after != status_before {
            self.events.emit(Event::StatusChanged {
                credit_id: payment.credit_id,
                old_status: status_before,
                new_status: status_after,
                timestamp: clock.now(),
            });
        }
        self.recalculate_client_category(client_id, clock.now().date_naive());
        self.dispatch(mark);
        Ok(())
    }

    /// live schedule projection: generated entries reconciled against the
    /// persisted payments by installment number (read-only)
    pub fn get_payment_schedule(
        &self,
        credit_id: CreditId,
        clock: &SafeTimeProvider,
    ) -> Result<Vec<InstallmentProjection>> {
        let credit = self
            .credits
            .get(&credit_id)
            .ok_or(LedgerError::CreditNotFound { id: credit_id })?;
        let delivered = credit
            .delivered_at
            .ok_or_else(|| LedgerError::Validation {
                message: format!("credit {credit_id} has not been delivered"),
            })?;
        let today = clock.now().date_naive();

        let entries = schedule::generate_schedule(
            credit.installment_amount,
            credit.total_installments,
            credit.periodicity,
            delivered.date_naive(),
            self.config.schedule.rest_day,
        );
        Ok(entries
            .into_iter()
            .map(|entry| {
                let paid_amount = self.installment_total(credit_id, Some(entry.number), None);
                let status = if paid_amount >= entry.amount {
                    InstallmentStatus::Paid
                } else if entry.due_date < today {
                    InstallmentStatus::Overdue
                } else if paid_amount.is_positive() {
                    InstallmentStatus::Partial
                } else {
                    InstallmentStatus::Pending
                };
                InstallmentProjection {
                    number: entry.number,
                    due_date: entry.due_date,
                    amount: entry.amount,
                    paid_amount,
                    status,
                }
            })
            .collect())
    }

    /// dual-path verification of the persisted counters against the
    /// payment-sum recomputation
    pub fn verify_credit_counters(&self, credit_id: CreditId) -> Result<CounterCheck> {
        let credit = self
            .credits
            .get(&credit_id)
            .ok_or(LedgerError::CreditNotFound { id: credit_id })?;
        let payments: Vec<&Payment> = self
            .payments
            .values()
            .filter(|p| p.credit_id == credit_id)
            .collect();

        Ok(CounterCheck {
            stored_balance: credit.balance,
            recomputed_balance: ledger::recompute_balance(credit.total_amount, &payments),
            stored_paid_installments: credit.paid_installments,
            recomputed_paid_installments: ledger::recount_paid_installments(
                credit.installment_amount,
                credit.total_installments,
                &payments,
            ),
        })
    }

    /// overwrite drifted counters with the recomputed values
    pub fn repair_credit_counters(&mut self, credit_id: CreditId) -> Result<CounterCheck> {
        let check = self.verify_credit_counters(credit_id)?;
        if !check.consistent() {
            let credit = self.credit_mut(credit_id)?;
            credit.balance = check.recomputed_balance;
            credit.paid_installments = check.recomputed_paid_installments;
            credit.version += 1;
        }
        Ok(check)
    }

    // ---- cash box reconciliation ----

    /// open a box for the collector's day, or recompute the totals of the
    /// existing one from the payments and deliveries on record
    pub fn open_or_auto_calculate_cash_box(
        &mut self,
        collector: UserId,
        date: NaiveDate,
        initial_amount: Option<Money>,
    ) -> Result<CashBalance> {
        if let Some(&box_id) = self.box_index.get(&(collector, date)) {
            let (collected, lent) = self.box_totals(box_id);
            let cash_box = self
                .cash_boxes
                .get_mut(&box_id)
                .ok_or(LedgerError::CashBoxNotFound { id: box_id })?;
            // a closed box is a settled record: return it as it stands
            if !cash_box.is_open() {
                return Ok(cash_box.clone());
            }
            cash_box.set_totals(collected, lent);
            if let Some(initial) = initial_amount {
                cash_box.initial_amount = initial;
            }
            return Ok(cash_box.clone());
        }
        self.open_cash_box(collector, date, initial_amount.unwrap_or(Money::ZERO))
    }

    /// open a new box; exactly one may exist per (collector, date)
    pub fn open_cash_box(
        &mut self,
        collector: UserId,
        date: NaiveDate,
        initial_amount: Money,
    ) -> Result<CashBalance> {
        let mark = self.events.events().len();
        if self.box_index.contains_key(&(collector, date)) {
            return Err(LedgerError::DuplicateCashBox { collector, date });
        }

        // carry-forward: prior days still open or flagged are listed, not
        // rolled into this day's numbers
        let mut pending: Vec<NaiveDate> = self
            .cash_boxes
            .values()
            .filter(|b| {
                b.collector == collector
                    && b.date < date
                    && (b.is_open() || b.requires_reconciliation)
            })
            .map(|b| b.date)
            .collect();
        pending.sort();

        let cash_box = CashBalance::new(Uuid::new_v4(), collector, date, initial_amount, pending);
        self.events.emit(Event::CashBoxOpened {
            box_id: cash_box.id,
            collector,
            date,
            initial_amount,
            has_pending_previous_boxes: cash_box.has_pending_previous_boxes,
        });
        self.box_index.insert((collector, date), cash_box.id);
        self.cash_boxes.insert(cash_box.id, cash_box.clone());
        self.dispatch(mark);
        Ok(cash_box)
    }

    /// close a box: with an actor it is a manual close, without one it
    /// follows the sweep path
    pub fn close_cash_box(
        &mut self,
        box_id: CashBoxId,
        actor: Option<UserId>,
        declared_final: Option<Money>,
        notes: Option<String>,
        expected_version: Option<u64>,
        clock: &SafeTimeProvider,
    ) -> Result<CashBalance> {
        let mark = self.events.events().len();
        let tolerance = self.config.cash_box.clone();
        let cash_box = self
            .cash_boxes
            .get_mut(&box_id)
            .ok_or(LedgerError::CashBoxNotFound { id: box_id })?;
        check_version(cash_box.version, expected_version)?;

        let outcome = match actor {
            Some(actor) => Some(cash_box.close_manual(actor, declared_final, notes, &tolerance, clock)?),
            None => cash_box.close_auto(&tolerance, clock),
        };
        let snapshot = cash_box.clone();

        if let Some(outcome) = outcome {
            self.events.emit(Event::CashBoxClosed {
                box_id,
                expected_final: outcome.expected_final,
                declared_final: outcome.declared_final,
                auto: actor.is_none(),
                timestamp: clock.now(),
            });
            if !outcome.discrepancy.is_zero() {
                self.events.emit(Event::DiscrepancyDetected {
                    box_id,
                    difference: outcome.discrepancy,
                    timestamp: clock.now(),
                });
            }
        }
        self.dispatch(mark);
        Ok(snapshot)
    }

    /// mark a closed, flagged box as resolved
    pub fn reconcile_cash_box(
        &mut self,
        box_id: CashBoxId,
        actor: UserId,
        clock: &SafeTimeProvider,
    ) -> Result<CashBalance> {
        let mark = self.events.events().len();
        let cash_box = self
            .cash_boxes
            .get_mut(&box_id)
            .ok_or(LedgerError::CashBoxNotFound { id: box_id })?;
        cash_box.mark_reconciled(actor, clock)?;
        let snapshot = cash_box.clone();
        self.events.emit(Event::CashBoxReconciled {
            box_id,
            actor,
            timestamp: clock.now(),
        });
        self.dispatch(mark);
        Ok(snapshot)
    }

    /// end-of-day sweep: recompute totals and auto-close every box still
    /// open up to `date`; idempotent, already-closed boxes are untouched
    pub fn sweep_auto_close(&mut self, date: NaiveDate, clock: &SafeTimeProvider) -> usize {
        let mark = self.events.events().len();
        let tolerance = self.config.cash_box.clone();
        let open_ids: Vec<CashBoxId> = self
            .cash_boxes
            .values()
            .filter(|b| b.is_open() && b.date <= date)
            .map(|b| b.id)
            .collect();

        let mut closed = 0;
        for box_id in open_ids {
            let (collected, lent) = self.box_totals(box_id);
            let Some(cash_box) = self.cash_boxes.get_mut(&box_id) else {
                continue;
            };
            cash_box.set_totals(collected, lent);
            if let Some(outcome) = cash_box.close_auto(&tolerance, clock) {
                closed += 1;
                self.events.emit(Event::CashBoxClosed {
                    box_id,
                    expected_final: outcome.expected_final,
                    declared_final: outcome.declared_final,
                    auto: true,
                    timestamp: clock.now(),
                });
                if !outcome.discrepancy.is_zero() {
                    self.events.emit(Event::DiscrepancyDetected {
                        box_id,
                        difference: outcome.discrepancy,
                        timestamp: clock.now(),
                    });
                }
            }
        }
        self.dispatch(mark);
        closed
    }

    // ---- client risk ----

    /// recompute a client's category from their overdue installments across
    /// active credits
    pub fn recalculate_category_from_overdues(
        &mut self,
        client_id: ClientId,
        clock: &SafeTimeProvider,
    ) -> Result<String> {
        let mark = self.events.events().len();
        if !self.clients.contains_key(&client_id) {
            return Err(LedgerError::ClientNotFound { id: client_id });
        }
        let overdue = self.overdue_installment_count(client_id, clock.now().date_naive());
        if select_category(&self.categories, overdue).is_none() {
            return Err(LedgerError::NoMatchingCategory {
                overdue_count: overdue,
            });
        }
        self.recalculate_client_category(client_id, clock.now().date_naive());
        self.dispatch(mark);
        Ok(self.clients[&client_id].category_code.clone())
    }

    pub fn overdue_installment_count(&self, client_id: ClientId, today: NaiveDate) -> u32 {
        let rest_day = self.config.schedule.rest_day;
        self.credits
            .values()
            .filter(|c| c.client_id == client_id && c.status == CreditStatus::Active)
            .map(|c| c.overdue_installments(today, rest_day))
            .sum()
    }

    fn recalculate_client_category(&mut self, client_id: ClientId, today: NaiveDate) {
        let overdue = self.overdue_installment_count(client_id, today);
        let Some(new_code) = select_category(&self.categories, overdue).map(|c| c.code.clone())
        else {
            return;
        };
        let Some(client) = self.clients.get_mut(&client_id) else {
            return;
        };
        if client.category_code != new_code {
            let old_code = std::mem::replace(&mut client.category_code, new_code.clone());
            self.events.emit(Event::CategoryChanged {
                client_id,
                old_code,
                new_code,
                overdue_count: overdue,
            });
        }
    }

    // ---- internals ----

    fn credit_mut(&mut self, id: CreditId) -> Result<&mut Credit> {
        self.credits
            .get_mut(&id)
            .ok_or(LedgerError::CreditNotFound { id })
    }

    /// sum of balance effects credited against one installment, optionally
    /// excluding a payment being edited or deleted
    fn installment_total(
        &self,
        credit_id: CreditId,
        installment_number: Option<u32>,
        exclude: Option<PaymentId>,
    ) -> Money {
        let Some(number) = installment_number else {
            return Money::ZERO;
        };
        self.payments
            .values()
            .filter(|p| {
                p.credit_id == credit_id
                    && p.installment_number == Some(number)
                    && Some(p.id) != exclude
            })
            .map(|p| p.balance_effect())
            .fold(Money::ZERO, |acc, x| acc + x)
    }

    /// aggregate a box's totals from the payments and deliveries on record
    fn box_totals(&self, box_id: CashBoxId) -> (Money, Money) {
        let collected = self
            .payments
            .values()
            .filter(|p| p.cash_box == Some(box_id) && p.status == PaymentStatus::Completed)
            .map(|p| p.amount)
            .fold(Money::ZERO, |acc, x| acc + x);
        let lent = self
            .credits
            .values()
            .filter(|c| c.funding_cash_box == Some(box_id))
            .map(|c| c.principal)
            .fold(Money::ZERO, |acc, x| acc + x);
        (collected, lent)
    }

    fn find_or_open_box(&mut self, collector: UserId, date: NaiveDate) -> CashBoxId {
        if let Some(&box_id) = self.box_index.get(&(collector, date)) {
            return box_id;
        }
        // auto-created at the first payment/delivery of the day
        match self.open_cash_box(collector, date, Money::ZERO) {
            Ok(cash_box) => cash_box.id,
            // unreachable: the index was just checked
            Err(_) => self.box_index[&(collector, date)],
        }
    }

    /// fire-and-forget fan-out of the events emitted since `mark`
    fn dispatch(&mut self, mark: usize) {
        let events: Vec<Event> = self.events.events()[mark..].to_vec();
        for event in &events {
            self.sink.notify(event);
        }
    }
}

fn check_version(actual: u64, expected: Option<u64>) -> Result<()> {
    match expected {
        Some(expected) if expected != actual => {
            Err(LedgerError::ConcurrencyConflict { expected, actual })
        }
        _ => Ok(()),
    }
}

fn log_illegal(err: LedgerError) -> LedgerError {
    if matches!(err, LedgerError::IllegalTransition { .. }) {
        info!(%err, "operation refused");
    }
    err
}

fn cash_effect(payment: &Payment) -> Money {
    if payment.status == PaymentStatus::Completed {
        payment.amount
    } else {
        Money::ZERO
    }
}
