use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        addresses::{AddressList, CreateAddressRequest},
        auth::{LoginRequest, LoginResponse, RegisterRequest},
        cart::{AddItemRequest, CartView, UpdateItemRequest},
        orders::{CreateOrderRequest, OrderList, UpdateOrderStatusRequest},
        payments::{CreatePaymentRequest, PaymentList, RefundPaymentRequest, WebhookAck},
        products::{CreateProductRequest, ProductList, UpdateProductRequest},
    },
    models::{Address, Cart, CartItem, Order, OrderItem, OrderStatus, Payment, PaymentStatus, Product, User},
    response::{ApiResponse, Meta},
    routes::{addresses, admin, auth, cart, health, orders, params, payments, products, webhooks},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::login,
        auth::me,
        products::list_products,
        products::get_product,
        products::create_product,
        products::update_product,
        products::delete_product,
        addresses::list_addresses,
        addresses::create_address,
        cart::current_cart,
        cart::get_cart,
        cart::add_item,
        cart::update_item,
        cart::remove_item,
        cart::clear_cart,
        orders::list_orders,
        orders::create_order,
        orders::get_order,
        orders::cancel_order,
        orders::list_payments,
        orders::create_payment,
        payments::get_payment,
        payments::refund_payment,
        payments::sync_payment,
        admin::list_all_orders,
        admin::update_order_status,
        webhooks::payment_webhook
    ),
    components(
        schemas(
            User,
            Product,
            Address,
            Cart,
            CartItem,
            Order,
            OrderItem,
            OrderStatus,
            Payment,
            PaymentStatus,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            CreateProductRequest,
            UpdateProductRequest,
            CreateAddressRequest,
            AddItemRequest,
            UpdateItemRequest,
            CreateOrderRequest,
            UpdateOrderStatusRequest,
            CreatePaymentRequest,
            RefundPaymentRequest,
            CartView,
            ProductList,
            AddressList,
            OrderList,
            PaymentList,
            WebhookAck,
            params::Pagination,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<CartView>,
            ApiResponse<Order>,
            ApiResponse<OrderList>,
            ApiResponse<Payment>,
            ApiResponse<PaymentList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Products", description = "Product catalog"),
        (name = "Addresses", description = "Shipping and billing addresses"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Payments", description = "Payment and refund endpoints"),
        (name = "Admin", description = "Admin endpoints"),
        (name = "Webhooks", description = "Payment provider callbacks"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
