use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use concierge_core::config::AgentConfig;
use concierge_core::{
    merge_addons, time_to_minutes, truncate_time, Addon, Booking, BookingId, BookingSlot,
    BookingStatus, Conversation, Customer, CustomerId, Order, OrderId, OrderStatus, Product,
    Service,
};
use concierge_db::repositories::{
    RepositoryError, SqlBookingRepository, SqlCatalogRepository, SqlCustomerRepository,
    SqlOrderRepository,
};

use crate::context::CatalogSnapshot;
use crate::identity::{ContactHints, IdentityResolver};
use crate::schema::{
    parse_args, CancelBookingArgs, CancelOrderArgs, CheckAvailabilityArgs, CreateBookingArgs,
    CreateCustomerArgs, CreateOrderArgs, GetBookingsArgs, GetOrdersArgs, ToolName,
    UpdateBookingArgs, UpdateCustomerArgs, UpdateCustomerInsightArgs,
};

/// Request-scoped state threaded explicitly through every dispatch: the
/// currently resolved customer and the prefetched catalog snapshot. Handlers
/// that discover or create a customer return the updated value; nothing is
/// mutated behind the caller's back.
#[derive(Clone, Debug, Default)]
pub struct ExecutorContext {
    pub customer: Option<Customer>,
    pub snapshot: CatalogSnapshot,
}

/// Structured result of one tool dispatch, fed back to the model verbatim.
#[derive(Clone, Debug)]
pub struct ToolOutcome {
    pub payload: Value,
    pub success: bool,
}

impl ToolOutcome {
    fn from_payload(payload: Value) -> Self {
        let success = payload.get("success").and_then(Value::as_bool).unwrap_or(false);
        Self { payload, success }
    }
}

fn failure(message: impl Into<String>) -> Value {
    json!({"success": false, "error": message.into()})
}

pub struct ToolExecutor {
    bookings: SqlBookingRepository,
    orders: SqlOrderRepository,
    customers: SqlCustomerRepository,
    catalog: SqlCatalogRepository,
    identity: IdentityResolver,
    config: AgentConfig,
}

impl ToolExecutor {
    pub fn new(
        bookings: SqlBookingRepository,
        orders: SqlOrderRepository,
        customers: SqlCustomerRepository,
        catalog: SqlCatalogRepository,
        identity: IdentityResolver,
        config: AgentConfig,
    ) -> Self {
        Self { bookings, orders, customers, catalog, identity, config }
    }

    /// Execute one tool call. Every store error inside a handler is caught
    /// here and converted into a structured failure so the remaining calls
    /// in the turn still run.
    pub async fn dispatch(
        &self,
        conversation: &Conversation,
        ctx: ExecutorContext,
        tool: ToolName,
        raw_args: &str,
    ) -> (ExecutorContext, ToolOutcome) {
        let result = self.dispatch_inner(conversation, ctx.clone(), tool, raw_args).await;
        match result {
            Ok((ctx, payload)) => (ctx, ToolOutcome::from_payload(payload)),
            Err(error) => {
                warn!(
                    event_name = "executor.tool_failed",
                    tool = tool.as_str(),
                    error = %error,
                    "tool handler failed"
                );
                (ctx, ToolOutcome::from_payload(failure(format!("internal error: {error}"))))
            }
        }
    }

    async fn dispatch_inner(
        &self,
        conversation: &Conversation,
        ctx: ExecutorContext,
        tool: ToolName,
        raw_args: &str,
    ) -> Result<(ExecutorContext, Value), RepositoryError> {
        match tool {
            ToolName::CheckAvailability => {
                let payload = self.check_availability(conversation, parse_args(raw_args)).await?;
                Ok((ctx, payload))
            }
            ToolName::CreateBooking => {
                self.create_booking(conversation, ctx, parse_args(raw_args)).await
            }
            ToolName::UpdateBooking => {
                let payload = self.update_booking(conversation, &ctx, parse_args(raw_args)).await?;
                Ok((ctx, payload))
            }
            ToolName::GetBookings => {
                let payload = self.get_bookings(conversation, &ctx, parse_args(raw_args)).await?;
                Ok((ctx, payload))
            }
            ToolName::CancelBooking => {
                let payload = self.cancel_booking(conversation, parse_args(raw_args)).await?;
                Ok((ctx, payload))
            }
            ToolName::CreateOrder => {
                self.create_order(conversation, ctx, parse_args(raw_args)).await
            }
            ToolName::GetOrders => {
                let payload = self.get_orders(conversation, &ctx, parse_args(raw_args)).await?;
                Ok((ctx, payload))
            }
            ToolName::CancelOrder => {
                let payload = self.cancel_order(conversation, parse_args(raw_args)).await?;
                Ok((ctx, payload))
            }
            ToolName::CreateCustomer => {
                self.create_customer(conversation, ctx, parse_args(raw_args)).await
            }
            ToolName::UpdateCustomer => {
                self.update_customer(conversation, ctx, parse_args(raw_args)).await
            }
            ToolName::UpdateCustomerInsight => {
                self.update_customer_insight(conversation, ctx, parse_args(raw_args)).await
            }
        }
    }

    // --- availability ----------------------------------------------------

    async fn check_availability(
        &self,
        conversation: &Conversation,
        args: CheckAvailabilityArgs,
    ) -> Result<Value, RepositoryError> {
        let Some(date) = args.date.as_deref().and_then(parse_date) else {
            return Ok(failure("a date in YYYY-MM-DD format is required"));
        };

        let slots = self.bookings.slots_for_date(&conversation.business_id, date).await?;
        let open: Vec<Value> = slots
            .iter()
            .filter(|slot| slot.has_capacity())
            .map(|slot| json!({"time": slot.slot_time, "slots_left": slot.remaining()}))
            .collect();

        Ok(json!({"success": true, "date": date.to_string(), "available": open}))
    }

    // --- bookings --------------------------------------------------------

    async fn create_booking(
        &self,
        conversation: &Conversation,
        mut ctx: ExecutorContext,
        args: CreateBookingArgs,
    ) -> Result<(ExecutorContext, Value), RepositoryError> {
        let Some(service_name) = args.service_name.as_deref().filter(|s| !s.trim().is_empty())
        else {
            return Ok((ctx, failure("service_name is required")));
        };
        let Some(date) = args.date.as_deref().and_then(parse_date) else {
            return Ok((ctx, failure("a date in YYYY-MM-DD format is required")));
        };
        let Some(time) = args.time.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok((ctx, failure("a time in HH:MM format is required")));
        };

        let Some(service) = ctx.snapshot.find_service(service_name).cloned() else {
            let known = ctx
                .snapshot
                .services
                .iter()
                .map(|s| s.name.clone())
                .collect::<Vec<_>>()
                .join(", ");
            return Ok((ctx, failure(format!("unknown service `{service_name}`; offered: {known}"))));
        };

        let hints = ContactHints {
            name: args.customer_name.clone(),
            email: args.customer_email.clone(),
            phone: args.customer_phone.clone(),
        };
        let customer = self
            .resolve_or_create_customer(
                conversation,
                ctx.customer.clone(),
                args.customer_id.as_deref(),
                &hints,
            )
            .await?;
        ctx.customer = customer.clone();

        let incoming_addons = resolve_addons(&service, &args.addons);
        let customer_name = customer
            .as_ref()
            .map(|c| c.name.clone())
            .or(hints.name.clone())
            .or_else(|| conversation.visitor_name.clone());

        // Dedup: exact active match first, then the loose window heuristic.
        let duplicate = match self
            .bookings
            .find_active_duplicate(
                &conversation.business_id,
                customer.as_ref().map(|c| &c.id),
                customer_name.as_deref(),
                date,
                time,
            )
            .await?
        {
            Some(existing) => Some(existing),
            None => {
                self.loose_duplicate(conversation, customer_name.as_deref(), date, time).await?
            }
        };

        if let Some(mut existing) = duplicate {
            existing.addons = merge_addons(&existing.addons, &incoming_addons);
            // The merged row keeps its own service; price against that one
            // when the catalog still lists it.
            let price_basis = ctx
                .snapshot
                .find_service(&existing.service_name)
                .cloned()
                .unwrap_or_else(|| service.clone());
            existing.total_amount = booking_total(&price_basis, &existing.addons);
            if existing.customer_id.is_none() {
                existing.customer_id = customer.as_ref().map(|c| c.id.clone());
            }
            self.bookings.update_details(&existing).await?;
            return Ok((
                ctx,
                json!({
                    "success": true,
                    "deduplicated": true,
                    "booking_id": existing.id.0,
                    "addons": existing.addons,
                    "total_amount": existing.total_amount,
                    "message": "merged into an existing booking for the same slot",
                }),
            ));
        }

        // Live slot re-check with exact, seconds, and truncated time matches.
        let day_slots = self.bookings.slots_for_date(&conversation.business_id, date).await?;
        let slot = match match_slot(&day_slots, time) {
            Some(slot) if slot.has_capacity() => slot.clone(),
            _ => {
                let alternatives = nearest_alternatives(&day_slots, time, 3);
                if alternatives.is_empty() {
                    return Ok((
                        ctx,
                        failure(format!("no capacity at {time} on {date} and no open slots remain that day")),
                    ));
                }
                return Ok((
                    ctx,
                    json!({
                        "success": false,
                        "error": format!("no capacity at {time} on {date}"),
                        "alternatives": alternatives,
                    }),
                ));
            }
        };

        if !self.bookings.try_reserve_slot(&slot.id).await? {
            let alternatives = nearest_alternatives(&day_slots, time, 3);
            return Ok((
                ctx,
                json!({
                    "success": false,
                    "error": format!("slot {time} on {date} just filled up"),
                    "alternatives": alternatives,
                }),
            ));
        }

        let booking = Booking {
            id: BookingId(Uuid::new_v4().to_string()),
            business_id: conversation.business_id.clone(),
            customer_id: customer.as_ref().map(|c| c.id.clone()),
            customer_name,
            service_name: service.name.clone(),
            slot_date: date,
            slot_time: slot.slot_time.clone(),
            total_amount: booking_total(&service, &incoming_addons),
            addons: incoming_addons,
            status: BookingStatus::Confirmed,
            created_at: Utc::now(),
        };

        if let Err(error) = self.bookings.insert(&booking).await {
            // Give the seat back before surfacing the failure.
            let _ = self.bookings.release_slot(&slot.id).await;
            return Err(error);
        }

        Ok((
            ctx,
            json!({
                "success": true,
                "booking_id": booking.id.0,
                "service": booking.service_name,
                "date": booking.slot_date.to_string(),
                "time": booking.slot_time,
                "addons": booking.addons,
                "total_amount": booking.total_amount,
                "status": booking.status.as_str(),
            }),
        ))
    }

    /// Non-cancelled booking in the same (business, date, time) created
    /// within the dedup window, whose customer name matches case-insensitively
    /// or which has no linked customer yet.
    async fn loose_duplicate(
        &self,
        conversation: &Conversation,
        customer_name: Option<&str>,
        date: NaiveDate,
        time: &str,
    ) -> Result<Option<Booking>, RepositoryError> {
        let cutoff = (Utc::now() - chrono::Duration::minutes(self.config.dedup_window_minutes))
            .to_rfc3339();
        let recent = self
            .bookings
            .recent_bookings_for_date(&conversation.business_id, date, &cutoff)
            .await?;

        Ok(recent.into_iter().find(|booking| {
            if truncate_time(&booking.slot_time) != truncate_time(time) {
                return false;
            }
            match (&booking.customer_name, customer_name) {
                (Some(existing), Some(incoming)) => {
                    existing.trim().eq_ignore_ascii_case(incoming.trim())
                }
                _ => booking.customer_id.is_none(),
            }
        }))
    }

    async fn update_booking(
        &self,
        conversation: &Conversation,
        ctx: &ExecutorContext,
        args: UpdateBookingArgs,
    ) -> Result<Value, RepositoryError> {
        let Some(booking_id) = args.booking_id.as_deref().filter(|id| !id.trim().is_empty())
        else {
            return Ok(failure("booking_id is required"));
        };

        let Some(mut booking) = self
            .bookings
            .find_by_id(&conversation.business_id, &BookingId(booking_id.to_string()))
            .await?
        else {
            return Ok(failure(format!("no booking found with id {booking_id}")));
        };
        if booking.is_cancelled() {
            return Ok(failure("that booking is cancelled; create a new one instead"));
        }

        let old_date = booking.slot_date;
        let old_time = booking.slot_time.clone();

        if let Some(new_service) = args.service_name.as_deref().filter(|s| !s.trim().is_empty()) {
            let Some(service) = ctx.snapshot.find_service(new_service) else {
                return Ok(failure(format!("unknown service `{new_service}`")));
            };
            booking.service_name = service.name.clone();
        }

        let service = ctx.snapshot.find_service(&booking.service_name).cloned();

        if let Some(addon_names) = &args.addons {
            let incoming = match &service {
                Some(service) => resolve_addons(service, addon_names),
                None => addon_names
                    .iter()
                    .map(|name| Addon { name: name.clone(), price: None })
                    .collect(),
            };
            booking.addons = merge_addons(&booking.addons, &incoming);
        }
        if let Some(service) = &service {
            booking.total_amount = booking_total(service, &booking.addons);
        }

        let new_date = match args.date.as_deref() {
            Some(raw) => match parse_date(raw) {
                Some(date) => date,
                None => return Ok(failure("date must be in YYYY-MM-DD format")),
            },
            None => old_date,
        };
        let new_time = args.time.clone().unwrap_or_else(|| old_time.clone());
        let slot_changed = new_date != old_date
            || truncate_time(&new_time) != truncate_time(&old_time);

        let mut new_slot: Option<BookingSlot> = None;
        if slot_changed {
            let day_slots =
                self.bookings.slots_for_date(&conversation.business_id, new_date).await?;
            match match_slot(&day_slots, &new_time) {
                Some(slot) if slot.has_capacity() => {
                    booking.slot_date = new_date;
                    booking.slot_time = slot.slot_time.clone();
                    new_slot = Some(slot.clone());
                }
                _ => {
                    return Ok(json!({
                        "success": false,
                        "error": format!("no capacity at {new_time} on {new_date}"),
                        "alternatives": nearest_alternatives(&day_slots, &new_time, 3),
                    }));
                }
            }
        }

        self.bookings.update_details(&booking).await?;

        // Swap slot counters only after the row update succeeded. Losing the
        // old slot record is tolerated, not fatal.
        if let Some(slot) = new_slot {
            if !self.bookings.try_reserve_slot(&slot.id).await? {
                warn!(
                    event_name = "executor.slot_swap_race",
                    booking_id = %booking.id.0,
                    "new slot filled during booking update"
                );
            }
            let old_slots =
                self.bookings.slots_for_date(&conversation.business_id, old_date).await?;
            match match_slot(&old_slots, &old_time) {
                Some(old_slot) => {
                    let _ = self.bookings.release_slot(&old_slot.id).await;
                }
                None => warn!(
                    event_name = "executor.old_slot_missing",
                    booking_id = %booking.id.0,
                    "old slot not found during booking update"
                ),
            }
        }

        Ok(json!({
            "success": true,
            "booking_id": booking.id.0,
            "service": booking.service_name,
            "date": booking.slot_date.to_string(),
            "time": booking.slot_time,
            "addons": booking.addons,
            "total_amount": booking.total_amount,
        }))
    }

    async fn get_bookings(
        &self,
        conversation: &Conversation,
        ctx: &ExecutorContext,
        args: GetBookingsArgs,
    ) -> Result<Value, RepositoryError> {
        let bookings = match &ctx.customer {
            Some(customer) => {
                self.bookings.list_for_customer(&conversation.business_id, &customer.id).await?
            }
            None => {
                let name = args
                    .customer_name
                    .clone()
                    .or_else(|| conversation.visitor_name.clone());
                let Some(name) = name.filter(|n| !n.trim().is_empty()) else {
                    return Ok(failure("no customer identified; ask for a name first"));
                };
                self.bookings
                    .list_for_customer_name(&conversation.business_id, &name)
                    .await?
            }
        };

        let rendered: Vec<Value> = bookings
            .iter()
            .map(|booking| {
                json!({
                    "booking_id": booking.id.0,
                    "service": booking.service_name,
                    "date": booking.slot_date.to_string(),
                    "time": booking.slot_time,
                    "addons": booking.addons,
                    "total_amount": booking.total_amount,
                    "status": booking.status.as_str(),
                })
            })
            .collect();

        Ok(json!({"success": true, "bookings": rendered}))
    }

    async fn cancel_booking(
        &self,
        conversation: &Conversation,
        args: CancelBookingArgs,
    ) -> Result<Value, RepositoryError> {
        let Some(booking_id) = args.booking_id.as_deref().filter(|id| !id.trim().is_empty())
        else {
            return Ok(failure("booking_id is required"));
        };

        let Some(booking) = self
            .bookings
            .find_by_id(&conversation.business_id, &BookingId(booking_id.to_string()))
            .await?
        else {
            return Ok(failure(format!("no booking found with id {booking_id}")));
        };

        // A repeated cancellation must not release the slot a second time.
        if !self.bookings.cancel(&booking.id).await? {
            return Ok(json!({
                "success": true,
                "booking_id": booking.id.0,
                "already_cancelled": true,
            }));
        }

        let day_slots =
            self.bookings.slots_for_date(&conversation.business_id, booking.slot_date).await?;
        match match_slot(&day_slots, &booking.slot_time) {
            Some(slot) => {
                let _ = self.bookings.release_slot(&slot.id).await;
            }
            None => warn!(
                event_name = "executor.cancel_slot_missing",
                booking_id = %booking.id.0,
                "slot not found while cancelling booking"
            ),
        }

        Ok(json!({"success": true, "booking_id": booking.id.0, "status": "cancelled"}))
    }

    // --- orders ----------------------------------------------------------

    async fn create_order(
        &self,
        conversation: &Conversation,
        mut ctx: ExecutorContext,
        args: CreateOrderArgs,
    ) -> Result<(ExecutorContext, Value), RepositoryError> {
        if args.items.is_empty() {
            return Ok((ctx, failure("items is required and must not be empty")));
        }

        let hints = ContactHints {
            name: args.customer_name.clone(),
            email: args.customer_email.clone(),
            phone: args.customer_phone.clone(),
        };
        let customer = self
            .resolve_or_create_customer(
                conversation,
                ctx.customer.clone(),
                args.customer_id.as_deref(),
                &hints,
            )
            .await?;
        ctx.customer = customer.clone();

        // Validate every line against live catalog stock before any mutation.
        struct ValidatedLine {
            product: Product,
            variant_index: Option<usize>,
            quantity: i64,
        }
        let mut lines: Vec<ValidatedLine> = Vec::with_capacity(args.items.len());

        for item in &args.items {
            let Some(product_name) =
                item.product_name.as_deref().filter(|name| !name.trim().is_empty())
            else {
                return Ok((ctx, failure("every item needs a product_name")));
            };
            let quantity = item.quantity.unwrap_or(0);
            if quantity <= 0 {
                return Ok((
                    ctx,
                    failure(format!("quantity for {product_name} must be a positive integer")),
                ));
            }

            let snapshot_product = ctx.snapshot.find_product(product_name);
            let live = match snapshot_product {
                Some(found) => {
                    self.catalog.find_product(&conversation.business_id, &found.id).await?
                }
                None => None,
            };
            let Some(product) = live else {
                return Ok((ctx, failure(format!("unknown product `{product_name}`"))));
            };

            match item.variant_name.as_deref().filter(|name| !name.trim().is_empty()) {
                Some(variant_name) => {
                    let index = product
                        .variants
                        .iter()
                        .position(|v| v.name.eq_ignore_ascii_case(variant_name.trim()));
                    let Some(index) = index else {
                        return Ok((
                            ctx,
                            json!({
                                "success": false,
                                "error": format!("unknown variant `{variant_name}` for {}", product.name),
                                "in_stock_variants": in_stock_variants(&product),
                            }),
                        ));
                    };
                    if product.variants[index].effective_stock() < quantity {
                        return Ok((
                            ctx,
                            json!({
                                "success": false,
                                "error": format!(
                                    "only {} of {} ({}) in stock",
                                    product.variants[index].effective_stock(),
                                    product.name,
                                    product.variants[index].name
                                ),
                                "in_stock_variants": in_stock_variants(&product),
                            }),
                        ));
                    }
                    lines.push(ValidatedLine { product, variant_index: Some(index), quantity });
                }
                None => {
                    if product.effective_stock() < quantity {
                        return Ok((
                            ctx,
                            json!({
                                "success": false,
                                "error": format!(
                                    "only {} of {} in stock",
                                    product.effective_stock(),
                                    product.name
                                ),
                                "in_stock_variants": in_stock_variants(&product),
                            }),
                        ));
                    }
                    lines.push(ValidatedLine { product, variant_index: None, quantity });
                }
            }
        }

        // Every line validated; now decrement atomically, rolling back on a
        // lost race so the batch stays all-or-nothing.
        let mut decremented: Vec<(usize, bool)> = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            let ok = match line.variant_index {
                Some(variant_index) => {
                    self.orders
                        .try_decrement_variant_stock(
                            &line.product.variants[variant_index].id,
                            line.quantity,
                        )
                        .await?
                }
                None => {
                    self.orders.try_decrement_product_stock(&line.product.id, line.quantity).await?
                }
            };

            if !ok {
                for (rolled_index, was_variant) in decremented.iter().rev() {
                    let rolled = &lines[*rolled_index];
                    if *was_variant {
                        let variant_index = rolled.variant_index.unwrap_or_default();
                        self.orders
                            .restore_variant_stock(
                                &rolled.product.variants[variant_index].id,
                                rolled.quantity,
                            )
                            .await?;
                    } else {
                        self.orders
                            .restore_product_stock(&rolled.product.id, rolled.quantity)
                            .await?;
                    }
                }
                let label = match line.variant_index {
                    Some(variant_index) => format!(
                        "{} ({})",
                        line.product.name, line.product.variants[variant_index].name
                    ),
                    None => line.product.name.clone(),
                };
                return Ok((ctx, failure(format!("{label} sold out while placing the order"))));
            }
            decremented.push((index, line.variant_index.is_some()));
        }

        let mut created: Vec<Value> = Vec::with_capacity(lines.len());
        for line in &lines {
            let (variant_id, unit_price, label) = match line.variant_index {
                Some(variant_index) => {
                    let variant = &line.product.variants[variant_index];
                    (
                        Some(variant.id.clone()),
                        variant.effective_price(line.product.price),
                        format!("{} ({})", line.product.name, variant.name),
                    )
                }
                None => (None, line.product.price, line.product.name.clone()),
            };

            let order = Order {
                id: OrderId(Uuid::new_v4().to_string()),
                business_id: conversation.business_id.clone(),
                customer_id: customer.as_ref().map(|c| c.id.clone()),
                product_id: line.product.id.clone(),
                variant_id,
                product_name: label,
                quantity: line.quantity,
                total_amount: unit_price * line.quantity as f64,
                status: OrderStatus::Confirmed,
                created_at: Utc::now(),
            };
            self.orders.insert(&order).await?;
            created.push(json!({
                "order_id": order.id.0,
                "product": order.product_name,
                "quantity": order.quantity,
                "total_amount": order.total_amount,
            }));
        }

        Ok((ctx, json!({"success": true, "orders": created})))
    }

    async fn get_orders(
        &self,
        conversation: &Conversation,
        ctx: &ExecutorContext,
        args: GetOrdersArgs,
    ) -> Result<Value, RepositoryError> {
        let orders = match &ctx.customer {
            Some(customer) => {
                self.orders.list_for_customer(&conversation.business_id, &customer.id).await?
            }
            None => {
                let name = args
                    .customer_name
                    .clone()
                    .or_else(|| conversation.visitor_name.clone());
                let Some(name) = name.filter(|n| !n.trim().is_empty()) else {
                    return Ok(failure("no customer identified; ask for a name first"));
                };
                self.orders.list_for_customer_name(&conversation.business_id, &name).await?
            }
        };

        let rendered: Vec<Value> = orders
            .iter()
            .map(|order| {
                json!({
                    "order_id": order.id.0,
                    "product": order.product_name,
                    "quantity": order.quantity,
                    "total_amount": order.total_amount,
                    "status": order.status.as_str(),
                })
            })
            .collect();

        Ok(json!({"success": true, "orders": rendered}))
    }

    async fn cancel_order(
        &self,
        conversation: &Conversation,
        args: CancelOrderArgs,
    ) -> Result<Value, RepositoryError> {
        let Some(order_id) = args.order_id.as_deref().filter(|id| !id.trim().is_empty()) else {
            return Ok(failure("order_id is required"));
        };

        let Some(order) = self
            .orders
            .find_by_id(&conversation.business_id, &OrderId(order_id.to_string()))
            .await?
        else {
            return Ok(failure(format!("no order found with id {order_id}")));
        };

        // Stock is restored exactly once, on the pending/confirmed → cancelled
        // transition.
        if !self.orders.cancel(&order.id).await? {
            return Ok(json!({
                "success": true,
                "order_id": order.id.0,
                "already_cancelled": true,
            }));
        }

        match &order.variant_id {
            Some(variant_id) => {
                self.orders.restore_variant_stock(variant_id, order.quantity).await?;
            }
            None => {
                self.orders.restore_product_stock(&order.product_id, order.quantity).await?;
            }
        }

        Ok(json!({
            "success": true,
            "order_id": order.id.0,
            "status": "cancelled",
            "restored_quantity": order.quantity,
        }))
    }

    // --- customers -------------------------------------------------------

    async fn create_customer(
        &self,
        conversation: &Conversation,
        mut ctx: ExecutorContext,
        args: CreateCustomerArgs,
    ) -> Result<(ExecutorContext, Value), RepositoryError> {
        let Some(name) = args.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
            return Ok((ctx, failure("a name is required to create a customer")));
        };

        let hints = ContactHints {
            name: Some(name.to_string()),
            email: args.email.clone(),
            phone: args.phone.clone(),
        };

        let (customer, created) =
            self.upsert_customer(conversation, name, &hints).await?;
        ctx.customer = Some(customer.clone());

        Ok((
            ctx,
            json!({
                "success": true,
                "customer_id": customer.id.0,
                "name": customer.name,
                "created": created,
            }),
        ))
    }

    async fn update_customer(
        &self,
        conversation: &Conversation,
        mut ctx: ExecutorContext,
        args: UpdateCustomerArgs,
    ) -> Result<(ExecutorContext, Value), RepositoryError> {
        let hints = ContactHints {
            name: args.name.clone(),
            email: args.email.clone(),
            phone: args.phone.clone(),
        };

        let existing = self
            .resolve_or_create_customer(
                conversation,
                ctx.customer.clone(),
                args.customer_id.as_deref(),
                &hints,
            )
            .await?;

        let customer = match existing {
            Some(customer) => {
                self.customers
                    .update_contact(
                        &customer.id,
                        args.name.as_deref(),
                        args.phone.as_deref(),
                        args.email.as_deref(),
                    )
                    .await?;
                let reloaded = self
                    .customers
                    .find_by_id(&conversation.business_id, &customer.id)
                    .await?
                    .unwrap_or(customer);
                self.identity.backfill(conversation, &reloaded).await;
                reloaded
            }
            None => {
                let Some(name) = args.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
                else {
                    return Ok((ctx, failure("no matching customer; a name is required to create one")));
                };
                self.upsert_customer(conversation, name, &hints).await?.0
            }
        };

        ctx.customer = Some(customer.clone());
        Ok((
            ctx,
            json!({
                "success": true,
                "customer_id": customer.id.0,
                "name": customer.name,
                "email": customer.email,
                "phone": customer.phone,
            }),
        ))
    }

    async fn update_customer_insight(
        &self,
        conversation: &Conversation,
        mut ctx: ExecutorContext,
        args: UpdateCustomerInsightArgs,
    ) -> Result<(ExecutorContext, Value), RepositoryError> {
        let customer = match ctx.customer.clone() {
            Some(customer) => Some(customer),
            None => self.identity.resolve(conversation, None, None).await?,
        };
        let Some(mut customer) = customer else {
            return Ok((
                ctx,
                failure("no customer profile is linked to this conversation; create one first"),
            ));
        };

        if let Some(notes) = args.internal_notes {
            customer.internal_notes = Some(notes);
        }
        customer.tags = args.tags;
        if let Some(score) = args.lead_score {
            customer.lead_score = concierge_core::clamp_lead_score(score);
        }

        self.customers
            .update_insight(
                &customer.id,
                customer.internal_notes.as_deref().unwrap_or_default(),
                &customer.tags,
                customer.lead_score,
            )
            .await?;

        ctx.customer = Some(customer.clone());
        Ok((
            ctx,
            json!({
                "success": true,
                "customer_id": customer.id.0,
                "tags": customer.tags,
                "lead_score": customer.lead_score,
            }),
        ))
    }

    // --- shared helpers --------------------------------------------------

    /// Resolve the customer for a mutating tool, preferring an explicit id,
    /// then the already-resolved request customer, then identity resolution
    /// from contact hints. When nothing resolves and the caller supplied a
    /// name, a customer record is created so the action can attach to it.
    async fn resolve_or_create_customer(
        &self,
        conversation: &Conversation,
        current: Option<Customer>,
        explicit_id: Option<&str>,
        hints: &ContactHints,
    ) -> Result<Option<Customer>, RepositoryError> {
        if let Some(raw_id) = explicit_id.map(str::trim).filter(|id| !id.is_empty()) {
            let id = CustomerId(raw_id.to_string());
            if let Some(customer) =
                self.customers.find_by_id(&conversation.business_id, &id).await?
            {
                self.identity.backfill(conversation, &customer).await;
                return Ok(Some(customer));
            }
        }

        if current.is_some() {
            return Ok(current);
        }

        if let Some(resolved) = self.identity.resolve(conversation, None, Some(hints)).await? {
            return Ok(Some(resolved));
        }

        // Creation requires at least a name; without one the action proceeds
        // unattached.
        let name = hints
            .name
            .as_deref()
            .or(conversation.visitor_name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty());
        match name {
            Some(name) => Ok(Some(self.upsert_customer(conversation, name, hints).await?.0)),
            None => Ok(None),
        }
    }

    /// Dedup by email, then phone, then exact name; insert only when nothing
    /// matches. Returns the customer and whether it was newly created.
    async fn upsert_customer(
        &self,
        conversation: &Conversation,
        name: &str,
        hints: &ContactHints,
    ) -> Result<(Customer, bool), RepositoryError> {
        let business_id = &conversation.business_id;

        let mut existing = None;
        if let Some(email) = &hints.email {
            existing = self.customers.find_unique_by_email(business_id, email).await?;
        }
        if existing.is_none() {
            if let Some(phone) = &hints.phone {
                existing = self.customers.find_unique_by_phone(business_id, phone).await?;
            }
        }
        if existing.is_none() {
            existing = self.customers.find_unique_by_exact_name(business_id, name).await?;
        }

        if let Some(customer) = existing {
            self.identity.backfill(conversation, &customer).await;
            return Ok((customer, false));
        }

        let customer = Customer {
            id: CustomerId(Uuid::new_v4().to_string()),
            business_id: business_id.clone(),
            name: name.to_string(),
            phone: hints.phone.clone(),
            email: hints.email.clone(),
            internal_notes: None,
            tags: Vec::new(),
            lead_score: 0,
            created_at: Utc::now(),
        };
        self.customers.insert(&customer).await?;
        self.identity.backfill(conversation, &customer).await;
        Ok((customer, true))
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Match a requested time against the day's slots: exact string, then with
/// seconds appended, then by truncated HH:MM comparison.
fn match_slot<'a>(slots: &'a [BookingSlot], time: &str) -> Option<&'a BookingSlot> {
    let trimmed = time.trim();
    slots
        .iter()
        .find(|slot| slot.slot_time == trimmed)
        .or_else(|| {
            let with_seconds = format!("{trimmed}:00");
            slots.iter().find(|slot| slot.slot_time == with_seconds)
        })
        .or_else(|| {
            slots.iter().find(|slot| truncate_time(&slot.slot_time) == truncate_time(trimmed))
        })
}

/// Up to `limit` same-day slots with remaining capacity, nearest in time
/// first.
fn nearest_alternatives(slots: &[BookingSlot], time: &str, limit: usize) -> Vec<Value> {
    let target = time_to_minutes(time).unwrap_or(0);
    let mut open: Vec<&BookingSlot> = slots
        .iter()
        .filter(|slot| slot.has_capacity() && truncate_time(&slot.slot_time) != truncate_time(time))
        .collect();
    open.sort_by_key(|slot| (time_to_minutes(&slot.slot_time).unwrap_or(i64::MAX) - target).abs());
    open.truncate(limit);
    open.iter()
        .map(|slot| json!({"time": slot.slot_time, "slots_left": slot.remaining()}))
        .collect()
}

/// Variants of a product that still have stock, offered back to the model
/// when a requested line cannot be fulfilled.
fn in_stock_variants(product: &Product) -> Vec<Value> {
    product
        .variants
        .iter()
        .filter(|variant| variant.effective_stock() > 0)
        .map(|variant| json!({"name": variant.name, "in_stock": variant.effective_stock()}))
        .collect()
}

/// Attach catalog prices to requested add-on names. Names missing from the
/// service's catalog contribute zero.
fn resolve_addons(service: &Service, names: &[String]) -> Vec<Addon> {
    names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(|name| Addon { name: name.to_string(), price: Some(service.addon_price(name)) })
        .collect()
}

fn booking_total(service: &Service, addons: &[Addon]) -> f64 {
    service.price + addons.iter().map(|addon| addon.price.unwrap_or(0.0)).sum::<f64>()
}

#[cfg(test)]
mod tests {
    use concierge_core::config::AgentConfig;
    use concierge_core::{
        BookingSlot, BusinessId, Conversation, ConversationId, Service, ServiceAddon, ServiceId,
        SlotId,
    };
    use concierge_db::repositories::{
        SqlBookingRepository, SqlCatalogRepository, SqlConversationRepository,
        SqlCustomerRepository, SqlOrderRepository,
    };
    use concierge_db::{connect_with_settings, migrations, DbPool, DemoSeedDataset};

    use crate::context::CatalogSnapshot;
    use crate::identity::IdentityResolver;
    use crate::schema::ToolName;

    use super::{
        booking_total, match_slot, nearest_alternatives, resolve_addons, ExecutorContext,
        ToolExecutor,
    };

    fn slot(id: &str, time: &str, capacity: i64, booked: i64) -> BookingSlot {
        BookingSlot {
            id: SlotId(id.to_string()),
            business_id: BusinessId("biz-1".to_string()),
            slot_date: chrono::NaiveDate::from_ymd_opt(2026, 9, 1).expect("date"),
            slot_time: time.to_string(),
            capacity,
            booked_count: booked,
        }
    }

    fn service() -> Service {
        Service {
            id: ServiceId("svc-1".to_string()),
            business_id: BusinessId("biz-1".to_string()),
            name: "Signature Fade".to_string(),
            price: 45.0,
            duration_minutes: Some(45),
            addons: vec![ServiceAddon { name: "Beard Trim".to_string(), price: 15.0 }],
        }
    }

    #[test]
    fn slot_matching_falls_back_to_seconds_then_truncation() {
        let slots = vec![slot("a", "09:00:00", 2, 0), slot("b", "10:00", 2, 0)];

        assert_eq!(match_slot(&slots, "10:00").map(|s| s.id.0.as_str()), Some("b"));
        assert_eq!(match_slot(&slots, "09:00").map(|s| s.id.0.as_str()), Some("a"));
        assert_eq!(match_slot(&slots, "10:00:30").map(|s| s.id.0.as_str()), Some("b"));
        assert!(match_slot(&slots, "11:00").is_none());
    }

    #[test]
    fn alternatives_are_nearest_first_and_capped_at_three() {
        let slots = vec![
            slot("a", "08:00", 2, 0),
            slot("b", "09:30", 2, 0),
            slot("c", "10:00", 2, 2), // full: the requested slot
            slot("d", "10:30", 2, 0),
            slot("e", "14:00", 2, 0),
            slot("f", "15:00", 1, 1), // full
        ];

        let alternatives = nearest_alternatives(&slots, "10:00", 3);
        let times: Vec<&str> =
            alternatives.iter().map(|a| a["time"].as_str().expect("time")).collect();
        assert_eq!(times, vec!["10:30", "09:30", "08:00"]);
    }

    #[test]
    fn unmatched_addons_contribute_zero_to_the_total() {
        let service = service();
        let addons =
            resolve_addons(&service, &["beard trim".to_string(), "Glitter".to_string()]);

        assert_eq!(addons.len(), 2);
        assert_eq!(addons[0].price, Some(15.0));
        assert_eq!(addons[1].price, Some(0.0));
        assert_eq!(booking_total(&service, &addons), 60.0);
    }

    // --- integration against the demo dataset ----------------------------

    async fn seeded_executor() -> (DbPool, ToolExecutor) {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        DemoSeedDataset::load(&pool).await.expect("seed");
        sqlx::query("INSERT INTO conversation (id, business_id) VALUES ('conv-anon', 'biz-fade-001')")
            .execute(&pool)
            .await
            .expect("seed anonymous conversation");

        let executor = ToolExecutor::new(
            SqlBookingRepository::new(pool.clone()),
            SqlOrderRepository::new(pool.clone()),
            SqlCustomerRepository::new(pool.clone()),
            SqlCatalogRepository::new(pool.clone()),
            IdentityResolver::new(
                SqlCustomerRepository::new(pool.clone()),
                SqlConversationRepository::new(pool.clone()),
            ),
            AgentConfig::default(),
        );
        (pool, executor)
    }

    async fn snapshot_ctx(pool: &DbPool) -> ExecutorContext {
        let catalog = SqlCatalogRepository::new(pool.clone());
        let business_id = BusinessId("biz-fade-001".to_string());
        let snapshot = CatalogSnapshot {
            services: catalog.services(&business_id).await.expect("services"),
            products: catalog.products(&business_id).await.expect("products"),
            ..CatalogSnapshot::default()
        };
        ExecutorContext { customer: None, snapshot }
    }

    fn anonymous_conversation() -> Conversation {
        Conversation {
            id: ConversationId("conv-anon".to_string()),
            business_id: BusinessId("biz-fade-001".to_string()),
            visitor_name: None,
            visitor_email: None,
            visitor_phone: None,
        }
    }

    async fn slot_booked_count(pool: &DbPool, slot_id: &str) -> i64 {
        let (count,): (i64,) =
            sqlx::query_as("SELECT booked_count FROM booking_slot WHERE id = ?")
                .bind(slot_id)
                .fetch_one(pool)
                .await
                .expect("slot row");
        count
    }

    #[tokio::test]
    async fn booking_an_open_slot_confirms_and_increments_the_counter() {
        let (pool, executor) = seeded_executor().await;
        let ctx = snapshot_ctx(&pool).await;

        let args = r#"{"customer_name":"Jordan Lee","service_name":"Signature Fade","date":"2026-09-02","time":"09:00"}"#;
        let (_, outcome) = executor
            .dispatch(&anonymous_conversation(), ctx, ToolName::CreateBooking, args)
            .await;

        assert!(outcome.success, "unexpected payload: {}", outcome.payload);
        assert_eq!(outcome.payload["total_amount"], 45.0);
        assert_eq!(outcome.payload["status"], "confirmed");
        assert_eq!(slot_booked_count(&pool, "slot-fade-004").await, 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn booking_for_a_new_name_creates_the_customer_record() {
        let (pool, executor) = seeded_executor().await;
        let ctx = snapshot_ctx(&pool).await;

        let args = r#"{"customer_name":"Priya Natarajan","service_name":"Classic Cut","date":"2026-09-02","time":"09:00"}"#;
        let (ctx, outcome) = executor
            .dispatch(&anonymous_conversation(), ctx, ToolName::CreateBooking, args)
            .await;

        assert!(outcome.success, "unexpected payload: {}", outcome.payload);
        let customer = ctx.customer.expect("customer attached to the context");
        assert_eq!(customer.name, "Priya Natarajan");

        let (customer_rows,): (i64,) =
            sqlx::query_as("SELECT COUNT(1) FROM customer WHERE name = 'Priya Natarajan'")
                .fetch_one(&pool)
                .await
                .expect("customer count");
        assert_eq!(customer_rows, 1);

        let (linked_id,): (Option<String>,) = sqlx::query_as(
            "SELECT customer_id FROM booking WHERE customer_name = 'Priya Natarajan'",
        )
        .fetch_one(&pool)
        .await
        .expect("booking row");
        assert_eq!(linked_id.as_deref(), Some(customer.id.0.as_str()));

        pool.close().await;
    }

    #[tokio::test]
    async fn mangled_time_input_yields_a_structured_failure() {
        let (pool, executor) = seeded_executor().await;
        let ctx = snapshot_ctx(&pool).await;

        // A multi-byte character lands inside the HH:MM prefix.
        let args = r#"{"customer_name":"Jordan Lee","service_name":"Signature Fade","date":"2026-09-02","time":"10:0€"}"#;
        let (_, outcome) = executor
            .dispatch(&anonymous_conversation(), ctx, ToolName::CreateBooking, args)
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.payload["success"], false);

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(1) FROM booking WHERE slot_date = '2026-09-02'")
            .fetch_one(&pool)
            .await
            .expect("booking count");
        assert_eq!(rows, 0);

        pool.close().await;
    }

    #[tokio::test]
    async fn full_slot_is_rejected_with_nearest_same_day_alternatives() {
        let (pool, executor) = seeded_executor().await;
        let ctx = snapshot_ctx(&pool).await;

        // slot-fade-003 (11:00) is at capacity in the seed data.
        let args = r#"{"customer_name":"Jordan Lee","service_name":"Classic Cut","date":"2026-09-01","time":"11:00"}"#;
        let (_, outcome) = executor
            .dispatch(&anonymous_conversation(), ctx, ToolName::CreateBooking, args)
            .await;

        assert!(!outcome.success);
        let times: Vec<&str> = outcome.payload["alternatives"]
            .as_array()
            .expect("alternatives")
            .iter()
            .map(|alternative| alternative["time"].as_str().expect("time"))
            .collect();
        assert_eq!(times, vec!["10:00", "09:00"]);
        assert_eq!(slot_booked_count(&pool, "slot-fade-003").await, 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn repeated_booking_merges_into_one_row_with_the_addon_union() {
        let (pool, executor) = seeded_executor().await;
        let conversation = anonymous_conversation();

        let first = r#"{"customer_name":"Jordan Lee","service_name":"Signature Fade","date":"2026-09-02","time":"14:00","addons":["Beard Trim"]}"#;
        let ctx = snapshot_ctx(&pool).await;
        let (_, outcome) =
            executor.dispatch(&conversation, ctx, ToolName::CreateBooking, first).await;
        assert!(outcome.success, "unexpected payload: {}", outcome.payload);

        let second = r#"{"customer_name":"jordan lee","service_name":"Signature Fade","date":"2026-09-02","time":"14:00","addons":["Hot Towel"]}"#;
        let ctx = snapshot_ctx(&pool).await;
        let (_, outcome) =
            executor.dispatch(&conversation, ctx, ToolName::CreateBooking, second).await;

        assert!(outcome.success, "unexpected payload: {}", outcome.payload);
        assert_eq!(outcome.payload["deduplicated"], true);
        assert_eq!(outcome.payload["total_amount"], 68.0);

        let (rows,): (i64,) = sqlx::query_as(
            "SELECT COUNT(1) FROM booking WHERE slot_date = '2026-09-02' AND slot_time = '14:00'",
        )
        .fetch_one(&pool)
        .await
        .expect("booking count");
        assert_eq!(rows, 1);
        assert_eq!(slot_booked_count(&pool, "slot-fade-005").await, 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn order_batch_with_one_short_line_leaves_all_stock_untouched() {
        let (pool, executor) = seeded_executor().await;
        let ctx = snapshot_ctx(&pool).await;

        // Sandalwood has 6 in stock; the whole batch must be rejected.
        let args = r#"{"items":[
            {"product_name":"Matte Pomade","quantity":2},
            {"product_name":"Beard Oil","variant_name":"Sandalwood","quantity":7}
        ]}"#;
        let (_, outcome) =
            executor.dispatch(&anonymous_conversation(), ctx, ToolName::CreateOrder, args).await;

        assert!(!outcome.success);
        assert!(outcome.payload["in_stock_variants"].is_array());

        let (pomade_stock,): (i64,) =
            sqlx::query_as("SELECT current_stock FROM product WHERE id = 'prod-fade-001'")
                .fetch_one(&pool)
                .await
                .expect("pomade stock");
        assert_eq!(pomade_stock, 24);
        let (orders,): (i64,) = sqlx::query_as("SELECT COUNT(1) FROM orders")
            .fetch_one(&pool)
            .await
            .expect("order count");
        assert_eq!(orders, 0);

        pool.close().await;
    }

    #[tokio::test]
    async fn order_exceeding_remaining_stock_is_rejected_entirely() {
        let (pool, executor) = seeded_executor().await;
        sqlx::query("UPDATE product SET current_stock = 2 WHERE id = 'prod-fade-001'")
            .execute(&pool)
            .await
            .expect("set stock");
        let ctx = snapshot_ctx(&pool).await;

        let args = r#"{"items":[{"product_name":"Matte Pomade","quantity":3}]}"#;
        let (_, outcome) =
            executor.dispatch(&anonymous_conversation(), ctx, ToolName::CreateOrder, args).await;

        assert!(!outcome.success);
        let (stock,): (i64,) =
            sqlx::query_as("SELECT current_stock FROM product WHERE id = 'prod-fade-001'")
                .fetch_one(&pool)
                .await
                .expect("stock");
        assert_eq!(stock, 2);

        pool.close().await;
    }

    #[tokio::test]
    async fn insight_update_without_a_resolved_customer_mutates_nothing() {
        let (pool, executor) = seeded_executor().await;
        let ctx = snapshot_ctx(&pool).await;

        let args = r#"{"internal_notes":"Big spender","tags":["VIP"],"lead_score":90}"#;
        let (_, outcome) = executor
            .dispatch(&anonymous_conversation(), ctx, ToolName::UpdateCustomerInsight, args)
            .await;

        assert!(!outcome.success);
        assert!(outcome.payload["error"]
            .as_str()
            .expect("error")
            .contains("no customer profile"));

        let (tagged,): (i64,) =
            sqlx::query_as("SELECT COUNT(1) FROM customer WHERE tags_json LIKE '%VIP%'")
                .fetch_one(&pool)
                .await
                .expect("tag scan");
        assert_eq!(tagged, 0);

        pool.close().await;
    }
}
