use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::entities::order::PaymentMethod;
use crate::errors::ServiceError;
use crate::models::address::{ShippingAddress, ShippingField, ShippingForm};
use crate::models::cart::{Cart, CartLine, VariantSelection};
use crate::services::payments::PaymentOutcome;
use crate::services::shipping::ShippingLocator;

/// The order created when a checkout was confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: Uuid,
    pub reference: String,
    pub payment_method: PaymentMethod,
    pub total: Decimal,
    /// Invoice of the latest gateway attempt
    #[serde(default)]
    pub invoice: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum CheckoutStep {
    CartReview,
    ShippingForm,
    Confirmation,
    AwaitingPayment { order: PlacedOrder },
    Completed { order: PlacedOrder },
}

impl CheckoutStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CartReview => "cart_review",
            Self::ShippingForm => "shipping_form",
            Self::Confirmation => "confirmation",
            Self::AwaitingPayment { .. } => "awaiting_payment",
            Self::Completed { .. } => "completed",
        }
    }
}

/// Error shown on the confirmation step after a failed submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionError {
    pub message: String,
    pub retryable: bool,
}

/// Everything a shopper has entered during one checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: Uuid,
    cart: Cart,
    step: CheckoutStep,
    form: ShippingForm,
    field_errors: BTreeMap<ShippingField, String>,
    submission_in_flight: bool,
    last_error: Option<SubmissionError>,
    last_decline: Option<PaymentOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for CheckoutSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckoutSession {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            cart: Cart::default(),
            step: CheckoutStep::CartReview,
            form: ShippingForm::default(),
            field_errors: BTreeMap::new(),
            submission_in_flight: false,
            last_error: None,
            last_decline: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step(&self) -> &CheckoutStep {
        &self.step
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn form(&self) -> &ShippingForm {
        &self.form
    }

    pub fn field_errors(&self) -> &BTreeMap<ShippingField, String> {
        &self.field_errors
    }

    pub fn is_submitting(&self) -> bool {
        self.submission_in_flight
    }

    pub fn last_error(&self) -> Option<&SubmissionError> {
        self.last_error.as_ref()
    }

    pub fn last_decline(&self) -> Option<&PaymentOutcome> {
        self.last_decline.as_ref()
    }

    pub fn placed_order(&self) -> Option<&PlacedOrder> {
        match &self.step {
            CheckoutStep::AwaitingPayment { order } | CheckoutStep::Completed { order } => {
                Some(order)
            }
            _ => None,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn require_step(&self, expected: &CheckoutStep, action: &str) -> Result<(), ServiceError> {
        if std::mem::discriminant(&self.step) == std::mem::discriminant(expected) {
            Ok(())
        } else {
            Err(ServiceError::InvalidOperation(format!(
                "Cannot {action} during the {} step",
                self.step.name()
            )))
        }
    }

    // Cart

    pub fn add_line(&mut self, line: CartLine) -> Result<(), ServiceError> {
        self.require_step(&CheckoutStep::CartReview, "change the cart")?;
        self.cart.add(line)?;
        self.touch();
        Ok(())
    }

    pub fn remove_line(
        &mut self,
        product_id: &str,
        variant: &VariantSelection,
    ) -> Result<CartLine, ServiceError> {
        self.require_step(&CheckoutStep::CartReview, "change the cart")?;
        let removed = self.cart.remove(product_id, variant)?;
        self.touch();
        Ok(removed)
    }

    pub fn update_quantity(
        &mut self,
        product_id: &str,
        variant: &VariantSelection,
        quantity: u32,
    ) -> Result<(), ServiceError> {
        self.require_step(&CheckoutStep::CartReview, "change the cart")?;
        self.cart.update_quantity(product_id, variant, quantity)?;
        self.touch();
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), ServiceError> {
        self.require_step(&CheckoutStep::CartReview, "change the cart")?;
        self.cart.clear();
        self.touch();
        Ok(())
    }

    // Step transitions

    pub fn proceed_to_shipping(&mut self) -> Result<(), ServiceError> {
        self.require_step(&CheckoutStep::CartReview, "start shipping")?;
        if self.cart.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".to_string()));
        }
        self.step = CheckoutStep::ShippingForm;
        self.touch();
        Ok(())
    }

    /// Stores a form value. A field's error is cleared only when its value changes;
    /// changing the region also resets the chosen city.
    pub fn set_field(
        &mut self,
        field: ShippingField,
        value: impl Into<String>,
    ) -> Result<(), ServiceError> {
        self.require_step(&CheckoutStep::ShippingForm, "edit the shipping form")?;
        let value = value.into();
        let slot = self.form.slot(field);
        if *slot == value {
            return Ok(());
        }
        *slot = value;
        self.field_errors.remove(&field);

        if field == ShippingField::Region && !self.form.city.is_empty() {
            self.form.city.clear();
            self.field_errors.remove(&ShippingField::City);
        }
        self.touch();
        Ok(())
    }

    /// Cities offered for the currently selected region.
    pub fn available_cities(&self, locator: &ShippingLocator) -> &'static [&'static str] {
        locator.cities_of(&self.form.region)
    }

    /// Validates the form and advances to confirmation.
    ///
    /// On failure the session stays on the shipping form and `field_errors`
    /// holds exactly one message per invalid field.
    pub fn submit_shipping(
        &mut self,
        locator: &ShippingLocator,
    ) -> Result<ShippingAddress, ServiceError> {
        self.require_step(&CheckoutStep::ShippingForm, "submit the shipping form")?;

        let errors = Self::validate_form(&self.form, locator);
        self.field_errors = errors;
        self.touch();

        if !self.field_errors.is_empty() {
            let fields: Vec<String> = self.field_errors.keys().map(ToString::to_string).collect();
            return Err(ServiceError::ValidationError(format!(
                "Invalid shipping fields: {}",
                fields.join(", ")
            )));
        }

        self.form = self.form.trimmed();
        if let Some(region) = locator.canonical_region(&self.form.region) {
            if let Some(city) = locator.find_city(region, &self.form.city) {
                self.form.city = city.to_string();
            }
            self.form.region = region.to_string();
        }
        self.step = CheckoutStep::Confirmation;
        Ok(ShippingAddress::from_form(&self.form))
    }

    fn validate_form(
        form: &ShippingForm,
        locator: &ShippingLocator,
    ) -> BTreeMap<ShippingField, String> {
        let form = form.trimmed();
        let mut errors = BTreeMap::new();

        if let Err(validation) = form.validate() {
            for (name, field_errors) in validation.field_errors() {
                let Ok(field) = ShippingField::from_str(name) else {
                    continue;
                };
                if let Some(first) = field_errors.first() {
                    let message = first
                        .message
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| first.code.to_string());
                    errors.insert(field, message);
                }
            }
        }

        if !errors.contains_key(&ShippingField::Region)
            && locator.canonical_region(&form.region).is_none()
        {
            errors.insert(
                ShippingField::Region,
                "Choose a department from the list".to_string(),
            );
        }

        if !errors.contains_key(&ShippingField::Region)
            && !errors.contains_key(&ShippingField::City)
            && locator.find_city(&form.region, &form.city).is_none()
        {
            errors.insert(
                ShippingField::City,
                format!("Choose a city in {}", form.region),
            );
        }

        errors
    }

    /// The validated destination. Available once the form has been submitted.
    pub fn shipping_address(&self) -> Result<ShippingAddress, ServiceError> {
        match self.step {
            CheckoutStep::CartReview | CheckoutStep::ShippingForm => Err(
                ServiceError::InvalidOperation("Shipping details have not been submitted".to_string()),
            ),
            _ => Ok(ShippingAddress::from_form(&self.form)),
        }
    }

    /// Steps back without discarding anything entered.
    pub fn back(&mut self) -> Result<(), ServiceError> {
        if self.submission_in_flight {
            return Err(ServiceError::Conflict(
                "An order submission is in progress".to_string(),
            ));
        }
        self.step = match self.step {
            CheckoutStep::ShippingForm => CheckoutStep::CartReview,
            CheckoutStep::Confirmation => CheckoutStep::ShippingForm,
            _ => {
                return Err(ServiceError::InvalidOperation(format!(
                    "Cannot go back from the {} step",
                    self.step.name()
                )))
            }
        };
        self.touch();
        Ok(())
    }

    pub fn payment_path(&self, locator: &ShippingLocator) -> PaymentMethod {
        if locator.is_cod_eligible(&self.form.city, Some(&self.form.region)) {
            PaymentMethod::CashOnDelivery
        } else {
            PaymentMethod::Gateway
        }
    }

    // Submission

    /// Marks an order submission as started. A second call before
    /// `finish_submission`, or after an order was placed, is rejected.
    pub fn begin_submission(&mut self) -> Result<(), ServiceError> {
        if self.submission_in_flight {
            return Err(ServiceError::Conflict(
                "An order submission is already in progress".to_string(),
            ));
        }
        if let Some(order) = self.placed_order() {
            return Err(ServiceError::Conflict(format!(
                "Order {} was already placed for this checkout",
                order.reference
            )));
        }
        self.require_step(&CheckoutStep::Confirmation, "confirm the order")?;
        if self.cart.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".to_string()));
        }
        self.submission_in_flight = true;
        self.last_error = None;
        self.touch();
        Ok(())
    }

    /// Applies the result of an order submission.
    ///
    /// Success clears the cart and moves to `Completed` (cash on delivery) or
    /// `AwaitingPayment` (gateway). Failure keeps the session on confirmation
    /// with every entered value and records the error.
    pub fn finish_submission(
        &mut self,
        result: Result<PlacedOrder, ServiceError>,
    ) -> Result<PlacedOrder, ServiceError> {
        match result {
            Ok(order) => {
                self.complete_submission(order.clone());
                Ok(order)
            }
            Err(err) => {
                self.fail_submission(&err);
                Err(err)
            }
        }
    }

    pub fn complete_submission(&mut self, order: PlacedOrder) {
        self.submission_in_flight = false;
        self.cart.clear();
        self.last_error = None;
        self.step = match order.payment_method {
            PaymentMethod::CashOnDelivery => CheckoutStep::Completed { order },
            PaymentMethod::Gateway => CheckoutStep::AwaitingPayment { order },
        };
        self.touch();
    }

    pub fn fail_submission(&mut self, err: &ServiceError) {
        self.submission_in_flight = false;
        self.last_error = Some(SubmissionError {
            message: err.response_message(),
            retryable: err.is_retryable(),
        });
        self.touch();
    }

    /// Records the invoice of a new gateway attempt.
    pub fn set_payment_invoice(&mut self, invoice: String) -> Result<(), ServiceError> {
        match &mut self.step {
            CheckoutStep::AwaitingPayment { order } => {
                order.invoice = Some(invoice);
                self.touch();
                Ok(())
            }
            other => Err(ServiceError::InvalidOperation(format!(
                "No payment is expected during the {} step",
                other.name()
            ))),
        }
    }

    /// Approved payments complete the checkout; declines keep it awaiting payment
    /// so the shopper can try again.
    pub fn record_payment_outcome(&mut self, outcome: PaymentOutcome) -> Result<(), ServiceError> {
        let CheckoutStep::AwaitingPayment { order } = &self.step else {
            return Err(ServiceError::InvalidOperation(format!(
                "No payment is expected during the {} step",
                self.step.name()
            )));
        };

        match outcome {
            PaymentOutcome::Approved { transaction_id } => {
                let mut order = order.clone();
                order.transaction_id = Some(transaction_id);
                self.step = CheckoutStep::Completed { order };
                self.last_decline = None;
            }
            declined @ PaymentOutcome::Declined { .. } => {
                self.last_decline = Some(declined);
            }
        }
        self.touch();
        Ok(())
    }
}
