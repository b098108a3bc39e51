use pharmacy_core::{BatchId, DomainError, DrugId, Money};
use pharmacy_sales::{InvoiceNumber, SaleLine, SaleOrder};
use pharmacy_store::{SaleFilter, StoreError};

use super::Context;
use crate::cli::{RecordSaleArgs, SaleCommands, SaleListArgs};
use crate::render::{self, InvoiceView};

/// A `--item DRUG_ID:QTY[:BATCH_ID]` sale line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleItem {
    pub drug_id: DrugId,
    pub quantity: i64,
    pub batch_id: Option<BatchId>,
}

impl core::str::FromStr for SaleItem {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (Some(drug), Some(qty)) = (parts.next(), parts.next()) else {
            return Err(DomainError::validation(format!(
                "sale item '{s}' must look like DRUG_ID:QTY[:BATCH_ID]"
            )));
        };
        let batch_id = parts.next().map(|b| b.parse::<BatchId>()).transpose()?;
        if parts.next().is_some() {
            return Err(DomainError::validation(format!("sale item '{s}' has too many parts")));
        }
        let quantity: i64 = qty
            .trim()
            .parse()
            .map_err(|_| DomainError::validation(format!("invalid quantity '{qty}'")))?;
        Ok(Self {
            drug_id: drug.parse::<DrugId>()?,
            quantity,
            batch_id,
        })
    }
}

pub fn run(ctx: &Context<'_>, command: SaleCommands) -> anyhow::Result<()> {
    match command {
        SaleCommands::Record(args) => {
            let receipt = ctx.store.record_sale(order_from(ctx, args))?;
            let names = ctx.drug_names()?;
            render::emit(ctx.format, &receipt, |r| render::receipt(r, &names))
        }
        SaleCommands::List(args) => {
            let sales = ctx.store.list_sales(&filter(ctx, &args))?;
            let names = ctx.drug_names()?;
            render::emit_tabular(
                ctx.format,
                &sales,
                |s| render::sales_csv(s, &names),
                |s| render::sales(s, &names),
            )
        }
        SaleCommands::Show { invoice } => {
            let view = invoice_view(ctx, &invoice)?;
            let names = ctx.drug_names()?;
            render::emit(ctx.format, &view, |v| render::invoice(v, &names))
        }
        SaleCommands::Void { invoice, reason } => {
            let returns = ctx.store.void_invoice(&invoice, &reason)?;
            let units: i64 = returns.iter().map(|r| r.quantity).sum();
            tracing::info!(%invoice, units, "invoice voided from cli");
            render::emit(ctx.format, &returns, |_| {
                render::message(&format!("Voided {invoice}: {units} units returned to stock"))
            })
        }
    }
}

pub fn order_from(ctx: &Context<'_>, args: RecordSaleArgs) -> SaleOrder {
    let discount = args.discount.unwrap_or(Money::ZERO);
    let lines = args
        .items
        .into_iter()
        .map(|item| {
            let line = SaleLine::new(item.drug_id, item.quantity).with_discount(discount);
            match item.batch_id {
                Some(batch_id) => line.from_batch(batch_id),
                None => line,
            }
        })
        .collect();
    SaleOrder {
        invoice: args.invoice,
        lines,
        sold_by: args.sold_by,
        sold_at: ctx.now,
    }
}

fn filter(ctx: &Context<'_>, args: &SaleListArgs) -> SaleFilter {
    SaleFilter {
        drug_id: args.drug,
        invoice: args.invoice.clone(),
        from: args.from.map(|d| d.resolve(ctx.today)),
        to: args.to.map(|d| d.resolve(ctx.today)),
    }
}

pub fn invoice_view(ctx: &Context<'_>, invoice: &InvoiceNumber) -> anyhow::Result<InvoiceView> {
    let filter = SaleFilter::for_invoice(invoice.clone());
    let mut lines = ctx.store.list_sales(&filter)?;
    if lines.is_empty() {
        return Err(StoreError::NotFound(format!("invoice {invoice}")).into());
    }
    lines.reverse();
    let returns = ctx.store.list_returns(&filter)?;

    let overflow = || anyhow::anyhow!("invoice {invoice} amounts are too large to total");
    let total = Money::checked_sum(lines.iter().map(|s| s.total)).ok_or_else(overflow)?;
    let refunds = returns
        .iter()
        .filter_map(|r| {
            lines
                .iter()
                .find(|s| s.id == r.sale_id)
                .map(|s| (s.unit_price - s.discount).checked_mul(r.quantity))
        })
        .collect::<Option<Vec<Money>>>()
        .ok_or_else(overflow)?;
    let refunded = Money::checked_sum(refunds).ok_or_else(overflow)?;
    Ok(InvoiceView {
        invoice: invoice.clone(),
        lines,
        returns,
        total,
        net_total: total.checked_sub(refunded).ok_or_else(overflow)?,
    })
}
